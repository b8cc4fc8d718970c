//! Local download directory.
//!
//! The fetcher only sees the narrow [`DownloadStore`] interface (list, get,
//! write, read), so the directory can be swapped for [`MemoryStore`] in
//! tests. [`DirStore`] writes through a `.part` file and renames it into
//! place: an interrupted write never leaves a truncated final file behind.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use walkdir::WalkDir;

use crate::error::{HelioError, Result};

const PARTIAL_SUFFIX: &str = ".part";

/// A file present in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    /// Name relative to the store root.
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

pub trait DownloadStore: Send + Sync {
    /// Root the stored paths are relative to.
    fn root(&self) -> &Path;

    /// All complete files, sorted by name.
    fn list(&self) -> Result<Vec<StoredFile>>;

    /// The file called `name`, if present.
    fn get(&self, name: &str) -> Result<Option<StoredFile>>;

    /// Store `bytes` under `name`, replacing any previous content.
    fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf>;

    fn read(&self, name: &str) -> Result<Vec<u8>>;
}

/// Store rooted at a directory on disk.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open (and create if needed) the directory at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| HelioError::io(&root, e))?;
        Ok(Self { root })
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

impl DownloadStore for DirStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn list(&self) -> Result<Vec<StoredFile>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.root).to_path_buf();
                HelioError::io(path, std::io::Error::other(e.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let name = path
                .strip_prefix(&self.root)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string();
            if name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            files.push(stat(path, name)?);
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    fn get(&self, name: &str) -> Result<Option<StoredFile>> {
        let path = self.path_of(name)?;
        if !path.is_file() {
            return Ok(None);
        }
        stat(&path, name.to_string()).map(Some)
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_of(name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HelioError::io(parent, e))?;
        }
        let partial = self.root.join(format!("{}{}", name, PARTIAL_SUFFIX));
        std::fs::write(&partial, bytes).map_err(|e| HelioError::io(&partial, e))?;
        if let Err(e) = std::fs::rename(&partial, &path) {
            let _ = std::fs::remove_file(&partial);
            return Err(HelioError::io(&path, e));
        }
        Ok(path)
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_of(name)?;
        std::fs::read(&path).map_err(|e| HelioError::io(&path, e))
    }
}

fn stat(path: &Path, name: String) -> Result<StoredFile> {
    let metadata = std::fs::metadata(path).map_err(|e| HelioError::io(path, e))?;
    let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
    Ok(StoredFile {
        name,
        path: path.to_path_buf(),
        size: metadata.len(),
        modified,
    })
}

/// Names must stay inside the store root.
fn validate_name(name: &str) -> Result<()> {
    let path = Path::new(name);
    let escapes = path.is_absolute()
        || path
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)));
    if name.is_empty() || escapes || name.ends_with(PARTIAL_SUFFIX) {
        return Err(HelioError::io(
            name,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "store names must be relative paths inside the store",
            ),
        ));
    }
    Ok(())
}

/// In-memory store; paths are virtual (`root/name`) and never touch disk.
pub struct MemoryStore {
    root: PathBuf,
    files: Mutex<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("memory"),
            files: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of files held.
    pub fn len(&self) -> usize {
        self.files.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, name: &str, bytes: &[u8], modified: DateTime<Utc>) -> StoredFile {
        StoredFile {
            name: name.to_string(),
            path: self.root.join(name),
            size: bytes.len() as u64,
            modified: Some(modified),
        }
    }

    fn poisoned(&self) -> HelioError {
        HelioError::io(
            &self.root,
            std::io::Error::other("memory store lock poisoned"),
        )
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadStore for MemoryStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn list(&self) -> Result<Vec<StoredFile>> {
        let files = self.files.lock().map_err(|_| self.poisoned())?;
        Ok(files
            .iter()
            .map(|(name, (bytes, modified))| self.entry(name, bytes, *modified))
            .collect())
    }

    fn get(&self, name: &str) -> Result<Option<StoredFile>> {
        let files = self.files.lock().map_err(|_| self.poisoned())?;
        Ok(files
            .get(name)
            .map(|(bytes, modified)| self.entry(name, bytes, *modified)))
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        validate_name(name)?;
        let mut files = self.files.lock().map_err(|_| self.poisoned())?;
        files.insert(name.to_string(), (bytes.to_vec(), Utc::now()));
        Ok(self.root.join(name))
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        let files = self.files.lock().map_err(|_| self.poisoned())?;
        files
            .get(name)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| {
                HelioError::io(
                    self.root.join(name),
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                )
            })
    }
}

//! Download remote files into the local store.
//!
//! The [`Fetcher`] handles each [`RemoteFile`] independently and reports one
//! [`FetchOutcome`] per descriptor, in input order. A failure on one file
//! never aborts the others, so callers can retry just [`FetchReport::failed`].
//!
//! # Deduplication
//!
//! Unless `overwrite` is set, a file already in the store is reused when it
//! can be verified against the record: by SHA-256 when the catalog supplies
//! a checksum, otherwise by size, otherwise by presence alone. Fresh
//! downloads are verified the same way before they are written; a mismatch
//! is a per-file [`HelioError::Download`] and nothing is stored.
//!
//! Each record gets its own local name (see [`RemoteFile::file_name`]). Two
//! records of one fetch that still resolve to the same name would share a
//! file, so the later one fails instead.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{HelioError, Result};
use crate::models::RemoteFile;
use crate::progress::{FetchProgressEvent, FetchProgressReporter, NoProgress};
use crate::store::{DownloadStore, StoredFile};
use crate::transport;

/// Byte source for remote files.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP(S) source with a request timeout; `file://` URLs are read from disk.
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: transport::build_client(timeout)?,
        })
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(path) = transport::file_url_path(url) {
            return std::fs::read(&path).map_err(|e| HelioError::io(path, e));
        }
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HelioError::from_transport("download", e))?;
        let resp = transport::check_status(resp, "download").await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| HelioError::from_transport("download", e))?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// Transferred during this run.
    Downloaded,
    /// A verified copy was already in the store.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedFile {
    pub path: PathBuf,
    pub status: FetchStatus,
    pub size: u64,
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub record: RemoteFile,
    pub result: Result<FetchedFile>,
}

/// Per-file results of one fetch, in the order the records were given.
#[derive(Debug, Default)]
pub struct FetchReport {
    outcomes: Vec<FetchOutcome>,
}

impl FetchReport {
    pub fn outcomes(&self) -> &[FetchOutcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Local paths of every successful outcome, in input order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|f| f.path.clone()))
            .collect()
    }

    /// Records whose fetch failed; pass these back to retry.
    pub fn failed(&self) -> Vec<RemoteFile> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_err())
            .map(|o| o.record.clone())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// Every local path, or the first per-file error.
    pub fn into_paths(self) -> Result<Vec<PathBuf>> {
        self.outcomes
            .into_iter()
            .map(|o| o.result.map(|f| f.path))
            .collect()
    }

    pub fn downloaded(&self) -> usize {
        self.count_status(FetchStatus::Downloaded)
    }

    pub fn skipped(&self) -> usize {
        self.count_status(FetchStatus::Skipped)
    }

    fn count_status(&self, status: FetchStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(&o.result, Ok(f) if f.status == status))
            .count()
    }
}

pub struct Fetcher {
    source: Box<dyn RemoteSource>,
    store: Arc<dyn DownloadStore>,
    overwrite: bool,
    progress: Box<dyn FetchProgressReporter>,
}

impl Fetcher {
    pub fn new(source: Box<dyn RemoteSource>, store: Arc<dyn DownloadStore>) -> Self {
        Self {
            source,
            store,
            overwrite: false,
            progress: Box::new(NoProgress),
        }
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn progress(mut self, reporter: Box<dyn FetchProgressReporter>) -> Self {
        self.progress = reporter;
        self
    }

    pub fn store(&self) -> &Arc<dyn DownloadStore> {
        &self.store
    }

    /// Fetch every record sequentially. Never fails as a whole: inspect the
    /// report for per-file errors.
    pub async fn fetch(&self, records: &[RemoteFile]) -> FetchReport {
        let total = records.len() as u64;
        let mut outcomes = Vec::with_capacity(records.len());

        let mut seen = HashSet::new();
        for (i, record) in records.iter().enumerate() {
            let name = record.file_name();
            self.progress
                .report(FetchProgressEvent::Resolving { name: name.clone() });
            self.progress.report(FetchProgressEvent::Downloading {
                name: name.clone(),
                n: i as u64 + 1,
                total,
            });

            let result = if seen.insert(name.clone()) {
                self.fetch_one(record, &name).await
            } else {
                Err(HelioError::download(
                    &name,
                    format!(
                        "record '{}' maps to the same local file as an earlier record",
                        record.id
                    ),
                ))
            };
            match &result {
                Ok(f) => debug!(file = %name, status = ?f.status, "fetched"),
                Err(e) => {
                    warn!(file = %name, error = %e, "fetch failed");
                    self.progress.report(FetchProgressEvent::Failed {
                        name: name.clone(),
                        reason: e.to_string(),
                    });
                }
            }

            outcomes.push(FetchOutcome {
                record: record.clone(),
                result,
            });
        }

        let report = FetchReport { outcomes };
        info!(
            total,
            downloaded = report.downloaded(),
            skipped = report.skipped(),
            failed = report.failed().len(),
            "fetch complete"
        );
        report
    }

    async fn fetch_one(&self, record: &RemoteFile, name: &str) -> Result<FetchedFile> {
        if !self.overwrite {
            if let Some(existing) = self.store.get(name).map_err(|e| as_download(name, e))? {
                if self.is_current(record, &existing)? {
                    return Ok(FetchedFile {
                        path: existing.path,
                        status: FetchStatus::Skipped,
                        size: existing.size,
                    });
                }
                debug!(file = %name, "stored copy does not verify, downloading again");
            }
        }

        let bytes = self
            .source
            .fetch_bytes(&record.url)
            .await
            .map_err(|e| as_download(name, e))?;
        verify(record, &bytes).map_err(|reason| HelioError::download(name, reason))?;

        let path = self
            .store
            .write(name, &bytes)
            .map_err(|e| as_download(name, e))?;
        Ok(FetchedFile {
            path,
            status: FetchStatus::Downloaded,
            size: bytes.len() as u64,
        })
    }

    fn is_current(&self, record: &RemoteFile, stored: &StoredFile) -> Result<bool> {
        if let Some(expected) = &record.sha256 {
            let bytes = self
                .store
                .read(&stored.name)
                .map_err(|e| as_download(&stored.name, e))?;
            return Ok(sha256_hex(&bytes).eq_ignore_ascii_case(expected));
        }
        if let Some(size) = record.size {
            return Ok(stored.size == size);
        }
        Ok(true)
    }
}

fn as_download(name: &str, err: HelioError) -> HelioError {
    match err {
        HelioError::Download { .. } => err,
        other => HelioError::download(name, other.to_string()),
    }
}

fn verify(record: &RemoteFile, bytes: &[u8]) -> std::result::Result<(), String> {
    if let Some(size) = record.size {
        if bytes.len() as u64 != size {
            return Err(format!(
                "expected {} bytes, received {}",
                size,
                bytes.len()
            ));
        }
    }
    if let Some(expected) = &record.sha256 {
        let actual = sha256_hex(bytes);
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(format!("checksum mismatch: expected {}, got {}", expected, actual));
        }
    }
    Ok(())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

//! Download directory overview.
//!
//! Lists what `helio fetch` has stored: file names, sizes and how long ago
//! each was written, plus totals. Used by `helio inventory` to check what
//! is already local before fetching again.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::store::{DownloadStore, StoredFile};

#[derive(Debug, Clone, Serialize)]
pub struct Inventory {
    pub root: String,
    pub files: Vec<InventoryEntry>,
    pub total_bytes: u64,
    /// File count per lowercase extension (`"fits"`, `"csv"`, ...).
    pub by_extension: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InventoryEntry {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl From<StoredFile> for InventoryEntry {
    fn from(f: StoredFile) -> Self {
        Self {
            name: f.name,
            size: f.size,
            modified: f.modified,
        }
    }
}

pub fn collect(store: &dyn DownloadStore) -> Result<Inventory> {
    let files: Vec<InventoryEntry> = store.list()?.into_iter().map(Into::into).collect();
    let total_bytes = files.iter().map(|f| f.size).sum();
    let mut by_extension = BTreeMap::new();
    for f in &files {
        let ext = f
            .name
            .rsplit_once('.')
            .map(|(_, e)| e.to_ascii_lowercase())
            .unwrap_or_else(|| "(none)".to_string());
        *by_extension.entry(ext).or_insert(0) += 1;
    }
    Ok(Inventory {
        root: store.root().display().to_string(),
        files,
        total_bytes,
        by_extension,
    })
}

/// Render the inventory as the plain-text report printed by the CLI.
pub fn format_report(inventory: &Inventory, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str("Helio Harness: Download Inventory\n");
    out.push_str("=================================\n\n");
    out.push_str(&format!("  Directory:   {}\n", inventory.root));
    out.push_str(&format!("  Files:       {}\n", inventory.files.len()));
    out.push_str(&format!(
        "  Size:        {}\n",
        format_bytes(inventory.total_bytes)
    ));

    if !inventory.by_extension.is_empty() {
        let kinds: Vec<String> = inventory
            .by_extension
            .iter()
            .map(|(ext, n)| format!("{} {}", n, ext))
            .collect();
        out.push_str(&format!("  Kinds:       {}\n", kinds.join(", ")));
    }

    if !inventory.files.is_empty() {
        out.push('\n');
        out.push_str(&format!("  {:<48} {:>10}   {}\n", "FILE", "SIZE", "FETCHED"));
        out.push_str(&format!("  {}\n", "-".repeat(76)));
        for f in &inventory.files {
            let when = match f.modified {
                Some(ts) => format_ts_relative(ts, now),
                None => "unknown".to_string(),
            };
            out.push_str(&format!(
                "  {:<48} {:>10}   {}\n",
                f.name,
                format_bytes(f.size),
                when
            ));
        }
    }
    out
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Relative time like "3 hours ago"; absolute date past 30 days or in the
/// future.
pub fn format_ts_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};

    #[test]
    fn bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn relative_times() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        assert_eq!(format_ts_relative(now - Duration::seconds(5), now), "just now");
        assert_eq!(format_ts_relative(now - Duration::minutes(1), now), "1 min ago");
        assert_eq!(format_ts_relative(now - Duration::hours(3), now), "3 hours ago");
        assert_eq!(format_ts_relative(now - Duration::days(2), now), "2 days ago");
        assert_eq!(
            format_ts_relative(now - Duration::days(60), now),
            "2024-03-11 12:00"
        );
        assert_eq!(
            format_ts_relative(now + Duration::hours(1), now),
            "2024-05-10 13:00"
        );
    }

    #[test]
    fn collects_totals_and_kinds() {
        let store = MemoryStore::new();
        store.write("a.fits", &[0u8; 100]).unwrap();
        store.write("b.FITS", &[0u8; 50]).unwrap();
        store.write("omni.csv", b"time\n").unwrap();

        let inventory = collect(&store).unwrap();
        assert_eq!(inventory.files.len(), 3);
        assert_eq!(inventory.total_bytes, 155);
        assert_eq!(inventory.by_extension.get("fits"), Some(&2));
        assert_eq!(inventory.by_extension.get("csv"), Some(&1));

        let report = format_report(&inventory, Utc::now());
        assert!(report.contains("Files:       3"));
        assert!(report.contains("2 fits"));
        assert!(report.contains("just now"));
    }

    #[test]
    fn empty_store_report() {
        let inventory = collect(&MemoryStore::new()).unwrap();
        let report = format_report(&inventory, Utc::now());
        assert!(report.contains("Files:       0"));
        assert!(!report.contains("FETCHED"));
    }
}

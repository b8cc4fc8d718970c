//! Core data carriers shared by the search and download stages.
//!
//! A [`RemoteFile`] is produced by a catalog search and consumed by the
//! fetcher; it describes a discoverable file that has not been downloaded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One catalog record: a remote file matching a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Catalog-unique identifier.
    pub id: String,
    pub instrument: String,
    /// Central wavelength in angstrom, when the observation has one.
    #[serde(default)]
    pub wavelength: Option<f64>,
    /// Observation interval covered by the file.
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Where the bytes live (`https://…` or `file://…`).
    pub url: String,
    /// Expected size in bytes, if the catalog knows it.
    #[serde(default)]
    pub size: Option<u64>,
    /// Expected lowercase hex SHA-256 of the file, if the catalog knows it.
    #[serde(default)]
    pub sha256: Option<String>,
}

impl RemoteFile {
    /// Local file name for this record.
    ///
    /// The last URL path segment, prefixed with the sanitized id unless the
    /// id already is that name (or its stem): archives serve one fixed name
    /// such as `image_lev1.fits` from many paths. The sanitized id alone
    /// when the URL does not end in a usable name.
    pub fn file_name(&self) -> String {
        let path = self
            .url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_end_matches('/');
        let segment = path.rsplit('/').next().unwrap_or_default();
        let base = sanitize(segment);
        let id = sanitize(&self.id);
        if base.is_empty() || base.chars().all(|c| c == '.' || c == '_') {
            return id;
        }
        let stem = base.rsplit_once('.').map(|(s, _)| s).unwrap_or(&base);
        if id.is_empty() || id == base || id == stem {
            base
        } else {
            format!("{}_{}", id, base)
        }
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Body returned by a catalog search endpoint (or a static `file://` index).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogResponse {
    #[serde(default)]
    pub records: Vec<RemoteFile>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str, url: &str) -> RemoteFile {
        let t = Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap();
        RemoteFile {
            id: id.to_string(),
            instrument: "AIA".to_string(),
            wavelength: Some(193.0),
            start: t,
            end: t,
            url: url.to_string(),
            size: None,
            sha256: None,
        }
    }

    #[test]
    fn file_name_from_url() {
        let r = record("aia_193_0000", "https://host/data/aia_193_0000.fits?token=abc");
        assert_eq!(r.file_name(), "aia_193_0000.fits");
        let r = record("aia_193_0000.fits", "https://host/data/aia_193_0000.fits");
        assert_eq!(r.file_name(), "aia_193_0000.fits");
    }

    #[test]
    fn shared_basename_gets_id_prefix() {
        let a = record("a", "https://jsoc/a/image_lev1.fits");
        let b = record("b", "https://jsoc/b/image_lev1.fits");
        assert_eq!(a.file_name(), "a_image_lev1.fits");
        assert_eq!(b.file_name(), "b_image_lev1.fits");
    }

    #[test]
    fn file_name_falls_back_to_id() {
        let r = record("aia:193/2024-05-10T00:00", "https://host/");
        assert_eq!(r.file_name(), "aia_193_2024-05-10T00_00_host");
        let r = record("aia:193/2024-05-10T00:00", "https://host/..");
        assert_eq!(r.file_name(), "aia_193_2024-05-10T00_00");
    }

    #[test]
    fn deserializes_minimal_record() {
        let json = r#"{"id":"a","instrument":"AIA","start":"2024-05-10T00:00:00Z",
            "end":"2024-05-10T00:00:12Z","url":"file:///tmp/a.fits"}"#;
        let r: RemoteFile = serde_json::from_str(json).unwrap();
        assert_eq!(r.wavelength, None);
        assert_eq!(r.size, None);
        assert_eq!(r.file_name(), "a.fits");
    }
}

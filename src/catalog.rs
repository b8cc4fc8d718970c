//! Remote data catalog search.
//!
//! The [`Catalog`] trait is the seam between the pipeline and whatever
//! service answers searches. [`HttpCatalog`] talks to a JSON search endpoint
//! or reads a static `file://` index; tests plug in their own catalogs.
//!
//! # Wire format
//!
//! ```text
//! GET {url}/search?start=2024-05-10T00:00:00Z&end=2024-05-11T00:00:00Z
//!                 &instrument=AIA&wavelength_min=193&wavelength_max=193
//!
//! {"records": [{"id": "...", "instrument": "AIA", "wavelength": 193.0,
//!               "start": "...", "end": "...", "url": "https://...",
//!               "size": 12345, "sha256": "..."}]}
//! ```
//!
//! Whatever the backend returns is passed through [`refine`], so every
//! record handed to the caller satisfies the search specification.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::CatalogConfig;
use crate::error::{HelioError, Result};
use crate::models::{CatalogResponse, RemoteFile};
use crate::query::SearchSpec;
use crate::transport;

/// A searchable collection of remote files.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Short label used in logs (e.g. `"http"`).
    fn name(&self) -> &str;

    /// Return every record matching `spec`, ordered by start time. An empty
    /// vector means nothing matched.
    async fn search(&self, spec: &SearchSpec) -> Result<Vec<RemoteFile>>;
}

/// Catalog backed by an HTTP search endpoint or a `file://` JSON index.
pub struct HttpCatalog {
    url: String,
    client: reqwest::Client,
}

impl HttpCatalog {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            client: transport::build_client(timeout)?,
        })
    }

    pub fn from_config(config: &CatalogConfig) -> Result<Self> {
        HttpCatalog::new(config.url.clone(), config.timeout())
    }

    async fn query_http(&self, spec: &SearchSpec) -> Result<Vec<RemoteFile>> {
        let endpoint = transport::join_url(&self.url, "search");
        let mut params = vec![
            ("start", spec.range().start().to_rfc3339()),
            ("end", spec.range().end().to_rfc3339()),
            ("instrument", spec.instrument().to_string()),
        ];
        if let Some(w) = spec.wavelength() {
            params.push(("wavelength_min", w.min().to_string()));
            params.push(("wavelength_max", w.max().to_string()));
        }

        debug!(endpoint = %endpoint, "querying catalog");
        let resp = self
            .client
            .get(&endpoint)
            .query(&params)
            .send()
            .await
            .map_err(|e| HelioError::from_transport("catalog search", e))?;
        let resp = transport::check_status(resp, "catalog search").await?;

        let body = resp
            .text()
            .await
            .map_err(|e| HelioError::from_transport("catalog search", e))?;
        parse_response(&body)
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    fn name(&self) -> &str {
        "http"
    }

    async fn search(&self, spec: &SearchSpec) -> Result<Vec<RemoteFile>> {
        let raw = match transport::file_url_path(&self.url) {
            Some(path) => read_index(&path)?,
            None => self.query_http(spec).await?,
        };
        let returned = raw.len();
        let records = refine(spec, raw);
        info!(
            instrument = spec.instrument(),
            returned,
            matched = records.len(),
            "catalog search complete"
        );
        Ok(records)
    }
}

fn parse_response(body: &str) -> Result<Vec<RemoteFile>> {
    let response: CatalogResponse = serde_json::from_str(body)
        .map_err(|e| HelioError::Parse(format!("catalog response is not valid: {}", e)))?;
    Ok(response.records)
}

fn read_index(path: &Path) -> Result<Vec<RemoteFile>> {
    let body = std::fs::read_to_string(path).map_err(|e| {
        HelioError::Network(format!("catalog index {} unreadable: {}", path.display(), e))
    })?;
    parse_response(&body)
}

/// Filter, order, deduplicate and cadence-thin raw catalog records.
///
/// Records not satisfying `spec` are dropped; the rest are sorted by start
/// time (then id), duplicate ids keep their first occurrence, and when the
/// spec carries a sample interval consecutive kept records are at least
/// that far apart.
pub fn refine(spec: &SearchSpec, records: Vec<RemoteFile>) -> Vec<RemoteFile> {
    let mut matching: Vec<RemoteFile> = records.into_iter().filter(|r| spec.matches(r)).collect();
    matching.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));

    let mut seen = HashSet::new();
    matching.retain(|r| seen.insert(r.id.clone()));

    if let Some(every) = spec.sample() {
        let mut last_kept = None;
        matching.retain(|r| match last_kept {
            Some(prev) if r.start - prev < every => false,
            _ => {
                last_kept = Some(r.start);
                true
            }
        });
    }

    matching
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{TimeRange, WavelengthRange};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn record(id: &str, minute: u32, instrument: &str, wavelength: f64) -> RemoteFile {
        let start = Utc.with_ymd_and_hms(2024, 5, 10, 0, minute, 0).unwrap();
        RemoteFile {
            id: id.to_string(),
            instrument: instrument.to_string(),
            wavelength: Some(wavelength),
            start,
            end: start + ChronoDuration::seconds(2),
            url: format!("https://example.org/{}.fits", id),
            size: None,
            sha256: None,
        }
    }

    fn aia_193() -> SearchSpec {
        SearchSpec::builder()
            .range(TimeRange::parse("2024-05-10", "2024-05-11").unwrap())
            .instrument("AIA")
            .wavelength(WavelengthRange::single(193.0).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn refine_filters_sorts_and_dedups() {
        let raw = vec![
            record("c", 30, "AIA", 193.0),
            record("a", 10, "AIA", 193.0),
            record("x", 15, "AIA", 171.0),
            record("y", 20, "EIT", 193.0),
            record("a", 10, "AIA", 193.0),
        ];
        let refined = refine(&aia_193(), raw);
        let ids: Vec<&str> = refined.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn every_result_satisfies_spec() {
        let spec = aia_193();
        let raw: Vec<RemoteFile> = (0..40)
            .map(|i| {
                let instrument = if i % 3 == 0 { "HMI" } else { "AIA" };
                let wavelength = if i % 2 == 0 { 193.0 } else { 211.0 };
                record(&format!("r{}", i), i, instrument, wavelength)
            })
            .collect();
        let refined = refine(&spec, raw);
        assert!(!refined.is_empty());
        for r in &refined {
            assert!(spec.matches(r));
            assert!(spec.range().overlaps(r.start, r.end));
        }
    }

    #[test]
    fn sample_thins_by_cadence() {
        let spec = SearchSpec::builder()
            .range(TimeRange::parse("2024-05-10", "2024-05-11").unwrap())
            .instrument("AIA")
            .sample(ChronoDuration::minutes(10))
            .build()
            .unwrap();
        let raw: Vec<RemoteFile> = (0..30)
            .map(|m| record(&format!("m{:02}", m), m, "AIA", 193.0))
            .collect();
        let ids: Vec<String> = refine(&spec, raw).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["m00", "m10", "m20"]);
    }

    #[test]
    fn empty_index_is_empty_result() {
        assert!(parse_response(r#"{"records": []}"#).unwrap().is_empty());
        assert!(parse_response("{}").unwrap().is_empty());
        assert!(matches!(
            parse_response("<html>"),
            Err(HelioError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn file_index_search() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join("index.json");
        let body = CatalogResponse {
            records: vec![record("b", 5, "AIA", 193.0), record("z", 5, "AIA", 304.0)],
        };
        std::fs::write(&index, serde_json::to_string(&body).unwrap()).unwrap();

        let catalog =
            HttpCatalog::new(format!("file://{}", index.display()), Duration::from_secs(5))
                .unwrap();
        let found = catalog.search(&aia_193()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "b");
    }

    #[tokio::test]
    async fn missing_file_index_is_network_error() {
        let catalog =
            HttpCatalog::new("file:///nonexistent/helio/index.json", Duration::from_secs(5))
                .unwrap();
        assert!(matches!(
            catalog.search(&aia_193()).await,
            Err(HelioError::Network(_))
        ));
    }
}

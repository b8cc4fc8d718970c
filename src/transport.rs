//! Shared HTTP plumbing for the catalog, fetcher and in-situ provider.
//!
//! Every remote call goes through a `reqwest::Client` built with the
//! configured timeout. `file://` URLs bypass HTTP and read from disk so a
//! static index or a local mirror can stand in for a remote service.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{HelioError, Result};

pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("helio-harness/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| HelioError::Network(format!("failed to build HTTP client: {}", e)))
}

/// Local path for a `file://` URL, or `None` for any other scheme.
pub fn file_url_path(url: &str) -> Option<PathBuf> {
    url.strip_prefix("file://").map(PathBuf::from)
}

/// Join a base URL and a path segment with exactly one slash.
pub fn join_url(base: &str, segment: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        segment.trim_start_matches('/')
    )
}

/// Turn a non-success response into an error. `400` and `422` mean the
/// request itself was rejected; everything else is a remote failure.
pub async fn check_status(resp: reqwest::Response, context: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(500).collect();
    if status == reqwest::StatusCode::BAD_REQUEST
        || status == reqwest::StatusCode::UNPROCESSABLE_ENTITY
    {
        Err(HelioError::InvalidQuery(format!(
            "{} rejected the request (HTTP {}): {}",
            context, status, excerpt
        )))
    } else {
        Err(HelioError::Network(format!(
            "{} failed (HTTP {}): {}",
            context, status, excerpt
        )))
    }
}

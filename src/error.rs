//! Error taxonomy shared by every pipeline stage.
//!
//! Each stage surfaces its own [`HelioError`] variant to the caller; nothing
//! is retried or recovered here. The CLI wraps these in `anyhow` for display.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, HelioError>;

#[derive(Debug, Error)]
pub enum HelioError {
    /// The catalog or data provider could not be reached, timed out, or
    /// answered with a server-side failure.
    #[error("network error: {0}")]
    Network(String),

    /// The search or data request is malformed (e.g. end before start).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A single remote file could not be transferred or verified.
    #[error("download of {name} failed: {reason}")]
    Download { name: String, reason: String },

    /// The file is not an image format this crate understands.
    #[error("unsupported format: {path}: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    /// The file claims a supported format but cannot be parsed.
    #[error("corrupt file: {path}: {reason}")]
    CorruptFile { path: PathBuf, reason: String },

    /// Dimensioned arithmetic or conversion between mismatched dimensions.
    #[error("incompatible units: {0}")]
    IncompatibleUnits(String),

    /// Tabular or structured payload that could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Frames that cannot be combined into one sequence.
    #[error("inconsistent sequence: {0}")]
    InconsistentSequence(String),
}

impl HelioError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HelioError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        HelioError::CorruptFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        HelioError::UnsupportedFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn download(name: impl Into<String>, reason: impl Into<String>) -> Self {
        HelioError::Download {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Map a reqwest failure onto the taxonomy. Every transport-level
    /// failure, including timeouts, is a [`HelioError::Network`].
    pub fn from_transport(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HelioError::Network(format!("{}: request timed out", context))
        } else if err.is_decode() {
            HelioError::Parse(format!("{}: {}", context, err))
        } else {
            HelioError::Network(format!("{}: {}", context, err))
        }
    }
}

//! Download progress reporting.
//!
//! Reports observable progress during `helio fetch` and `helio run` so users
//! see what is being resolved and how many files are left. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a fetch.
#[derive(Clone, Debug, PartialEq)]
pub enum FetchProgressEvent {
    /// Checking the store for an already-present copy of a file.
    Resolving { name: String },
    /// Starting on file `n` of `total`; a `Failed` event follows if it does not land.
    Downloading { name: String, n: u64, total: u64 },
    /// The file could not be fetched; the remaining files still are.
    Failed { name: String, reason: String },
}

/// Reports fetch progress. Implementations write to stderr (human or JSON).
pub trait FetchProgressReporter: Send + Sync {
    fn report(&self, event: FetchProgressEvent);
}

/// Human-friendly progress on stderr: "fetch  3 / 12 files  aia_193.fits".
pub struct StderrProgress;

impl FetchProgressReporter for StderrProgress {
    fn report(&self, event: FetchProgressEvent) {
        let line = match &event {
            FetchProgressEvent::Resolving { name } => format!("fetch  resolving {}\n", name),
            FetchProgressEvent::Downloading { name, n, total } => format!(
                "fetch  {} / {} files  {}\n",
                format_number(*n),
                format_number(*total),
                name
            ),
            FetchProgressEvent::Failed { name, reason } => {
                format!("fetch  FAILED {}: {}\n", name, reason)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl FetchProgressReporter for JsonProgress {
    fn report(&self, event: FetchProgressEvent) {
        let obj = match &event {
            FetchProgressEvent::Resolving { name } => serde_json::json!({
                "event": "progress",
                "phase": "resolving",
                "file": name
            }),
            FetchProgressEvent::Downloading { name, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "downloading",
                "file": name,
                "n": n,
                "total": total
            }),
            FetchProgressEvent::Failed { name, reason } => serde_json::json!({
                "event": "error",
                "file": name,
                "reason": reason
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl FetchProgressReporter for NoProgress {
    fn report(&self, _event: FetchProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn FetchProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}

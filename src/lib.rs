//! itemmatch - semantic item matching
//!
//! Matches free-text item descriptions from an input list against a target
//! reference list by embedding similarity.
//!
//! # Architecture
//!
//! - [`embeddings`] - Text preparation, remote and local backends, batch
//!   scheduling, circuit breaker
//! - [`matching`] - Cosine matching and the per-run pipeline
//! - [`config`] - Settings resolution (env > config file > default)
//! - [`cli`] - Command-line interface using clap
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod matching;

pub use error::{Error, Result};

/// Global CSV output flag (set when `--format csv`).
pub static CSV_OUTPUT: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

/// Check if CSV output is requested.
#[inline]
pub fn is_csv() -> bool {
    CSV_OUTPUT.load(std::sync::atomic::Ordering::Relaxed)
}

/// Escape a value for CSV output.
///
/// Quotes values containing commas, quotes or newlines.
#[must_use]
pub fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Read a list file: one item per line, blank lines skipped.
///
/// A trailing `\r` is stripped so CRLF files behave like LF files.
pub fn read_items(path: &std::path::Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::InvalidArgument(format!("Cannot read {}: {e}", path.display()))
    })?;
    Ok(content
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect())
}

//! Command implementations.

pub mod completions;
pub mod config;
pub mod prepare;
pub mod run;
pub mod version;

use std::sync::Arc;

use colored::Colorize;

use crate::embeddings::progress::{NoticeLevel, ProgressEvent, SharedProgress, silent};
use crate::error::{Error, Result};

/// Progress sink that prints every event to stderr.
pub(crate) fn stderr_progress(quiet: bool) -> SharedProgress {
    if quiet {
        return silent();
    }
    Arc::new(|event: &ProgressEvent| {
        let line = event.to_string();
        match event {
            ProgressEvent::Notice {
                level: NoticeLevel::Transient,
                ..
            } => eprintln!("{}", line.yellow()),
            ProgressEvent::Notice {
                level: NoticeLevel::Degraded,
                ..
            } => eprintln!("{}", line.yellow().bold()),
            ProgressEvent::Notice {
                level: NoticeLevel::Fatal,
                ..
            } => eprintln!("{}", line.red().bold()),
            ProgressEvent::Stage(_) => eprintln!("{}", line.cyan()),
            _ => eprintln!("{line}"),
        }
    })
}

/// Create the tokio runtime for async commands.
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))
}

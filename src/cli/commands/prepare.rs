//! Prepare command implementation.
//!
//! Shows what a cleaning mode does to every line of a file.

use std::path::Path;

use serde::Serialize;

use crate::embeddings::prepare::{CleanMode, prepare};
use crate::error::Result;

#[derive(Serialize)]
struct PreparedItem<'a> {
    original: &'a str,
    prepared: &'a str,
}

#[derive(Serialize)]
struct PrepareOutput<'a> {
    mode: CleanMode,
    count: usize,
    items: Vec<PreparedItem<'a>>,
}

/// Execute the prepare command.
pub fn execute(file: &Path, mode: CleanMode, json: bool) -> Result<()> {
    let items = crate::read_items(file)?;
    let prepared = prepare(&items, mode);

    if json {
        let output = PrepareOutput {
            mode,
            count: items.len(),
            items: items
                .iter()
                .zip(&prepared)
                .map(|(original, prepared)| PreparedItem { original, prepared })
                .collect(),
        };
        println!("{}", serde_json::to_string(&output)?);
    } else if crate::is_csv() {
        println!("original,prepared");
        for (original, cleaned) in items.iter().zip(&prepared) {
            println!("{},{}", crate::csv_escape(original), crate::csv_escape(cleaned));
        }
    } else {
        for line in &prepared {
            println!("{line}");
        }
    }

    Ok(())
}

//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::embeddings::prepare::CleanMode;
use crate::embeddings::types::OperatingMode;
use crate::matching::DEFAULT_THRESHOLD;

/// Output format for result tables.
#[derive(ValueEnum, Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table (default)
    #[default]
    Table,
    /// JSON (same as --json)
    Json,
    /// Comma-separated values
    Csv,
}

pub mod commands;

/// itemmatch - semantic matching of item descriptions against a reference list
#[derive(Parser, Debug)]
#[command(name = "itemmatch", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Output format (table, json, csv)
    #[arg(long, value_enum, global = true, default_value_t)]
    pub format: OutputFormat,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no progress or logs, only results and errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Match every input item against the target list
    Run(RunArgs),

    /// Preview text cleaning for a file
    Prepare {
        /// File with one item per line
        file: PathBuf,

        /// Cleaning mode (none, light-clean, minimal)
        #[arg(short, long, default_value = "light-clean")]
        mode: CleanMode,
    },

    /// Embed one text through the configured backends
    Test {
        /// Text to embed
        #[arg(default_value = "Hello world")]
        text: String,

        /// Operating mode (auto, api, local, off)
        #[arg(short, long)]
        mode: Option<OperatingMode>,
    },

    /// Inspect or edit the config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Show version information
    Version,
}

/// Which rows `run` prints.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShowFilter {
    /// Every row
    #[default]
    All,
    /// Only rows at or above the threshold
    Match,
    /// Only rows below the threshold
    NoMatch,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Input items, one per line
    #[arg(short, long)]
    pub input: PathBuf,

    /// Target reference items, one per line
    #[arg(short, long)]
    pub target: PathBuf,

    /// Minimum similarity for a match (0.0 - 1.0)
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    pub threshold: f32,

    /// Clean input text (embedding: whitespace only, display: punctuation and case)
    #[arg(long)]
    pub clean_input: bool,

    /// Clean target text
    #[arg(long)]
    pub clean_target: bool,

    /// Operating mode (auto, api, local, off)
    #[arg(short, long)]
    pub mode: Option<OperatingMode>,

    /// Items per embedding batch (max 1024)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Maximum concurrent batches
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Remote call timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Consecutive remote failures before falling back to the local model
    #[arg(long)]
    pub max_failures: Option<u32>,

    /// Run batches one at a time
    #[arg(long)]
    pub sequential: bool,

    /// Rows to print
    #[arg(long, value_enum, default_value_t)]
    pub show: ShowFilter,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Show resolved settings and their config file
    Show,

    /// Set a config file value
    Set {
        /// Key (concurrency, batch_size, async, timeout_secs, max_failures,
        /// mode, api_key, priority, endpoint, model, local_model)
        key: String,

        /// Value
        value: String,
    },

    /// Remove one key, or every key when none is given
    Reset {
        /// Key to remove
        key: Option<String>,
    },

    /// Print the config file path
    Path,
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

//! Run command implementation.
//!
//! Reads the input and target lists, runs a matching run and prints the
//! result table with a summary.

use colored::Colorize;
use serde::Serialize;

use super::{runtime, stderr_progress};
use crate::cli::{RunArgs, ShowFilter};
use crate::config::MatchSettings;
use crate::error::{Error, Result};
use crate::matching::{MatchReport, MatchRequest, MatchRow, MatchStatus, Matcher};

/// JSON output: the report with rows filtered by `--show`.
#[derive(Serialize)]
struct RunOutput<'a> {
    #[serde(flatten)]
    report: &'a MatchReport,
    shown: usize,
}

/// Apply CLI overrides on top of resolved settings.
fn apply_overrides(settings: &mut MatchSettings, args: &RunArgs) {
    if let Some(mode) = args.mode {
        settings.mode = mode;
    }
    if let Some(batch_size) = args.batch_size {
        settings.batch_size = batch_size;
    }
    if let Some(concurrency) = args.concurrency {
        settings.concurrency = concurrency;
    }
    if let Some(timeout) = args.timeout {
        settings.timeout_secs = timeout;
    }
    if let Some(max_failures) = args.max_failures {
        settings.max_failures = max_failures;
    }
    if args.sequential {
        settings.use_async = false;
    }
}

fn keep(row: &MatchRow, show: ShowFilter) -> bool {
    match show {
        ShowFilter::All => true,
        ShowFilter::Match => row.status == MatchStatus::Match,
        ShowFilter::NoMatch => row.status == MatchStatus::NoMatch,
    }
}

/// Execute the run command.
pub fn execute(args: &RunArgs, json: bool, quiet: bool) -> Result<()> {
    if !(0.0..=1.0).contains(&args.threshold) {
        return Err(Error::InvalidArgument(format!(
            "threshold must be between 0 and 1, got {}",
            args.threshold
        )));
    }

    let mut settings = MatchSettings::resolve()?;
    apply_overrides(&mut settings, args);

    let inputs = crate::read_items(&args.input)?;
    let targets = crate::read_items(&args.target)?;

    let matcher = Matcher::from_settings(&settings)?;
    matcher.controller().check_ready()?;

    let request = MatchRequest {
        inputs,
        targets,
        threshold: args.threshold,
        clean_input: args.clean_input,
        clean_target: args.clean_target,
    };

    let progress = stderr_progress(quiet || json);
    let mut report = runtime()?.block_on(matcher.run(request, progress))?;
    report.rows.retain(|row| keep(row, args.show));

    if json {
        let output = RunOutput {
            shown: report.rows.len(),
            report: &report,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else if crate::is_csv() {
        print_csv(&report);
    } else {
        print_table(&report, quiet);
    }

    Ok(())
}

fn print_csv(report: &MatchReport) {
    println!("status,input,best_match,similarity_score");
    for row in &report.rows {
        println!(
            "{},{},{},{:.4}",
            row.status,
            crate::csv_escape(&row.input_text),
            crate::csv_escape(row.matched_target.as_deref().unwrap_or("")),
            row.score
        );
    }
}

fn print_table(report: &MatchReport, quiet: bool) {
    let input_width = report
        .rows
        .iter()
        .map(|r| r.input_text.chars().count())
        .max()
        .unwrap_or(0)
        .clamp(5, 48);

    println!(
        "{}  {}  {}  {}",
        format!("{:<8}", "STATUS").bold(),
        format!("{:<input_width$}", "INPUT").bold(),
        format!("{:>6}", "SCORE").bold(),
        "BEST MATCH".bold()
    );
    for row in &report.rows {
        let padded = format!("{:<8}", row.status.to_string());
        let status = match row.status {
            MatchStatus::Match => padded.green(),
            MatchStatus::NoMatch => padded.red(),
        };
        println!(
            "{status}  {:<input_width$}  {:>6.4}  {}",
            truncate(&row.input_text, input_width),
            row.score,
            row.matched_target.as_deref().unwrap_or("-")
        );
    }

    if quiet {
        return;
    }

    let summary = &report.summary;
    println!();
    println!("{}", "Summary".cyan().bold());
    println!("  Total Inputs:  {}", summary.total_inputs);
    println!("  Matches:       {}", summary.matches);
    println!("  No Matches:    {}", summary.no_matches);
    println!(
        "  Average Score: {}",
        summary
            .average_match_score
            .map_or_else(|| "N/A".to_string(), |s| format!("{s:.3}"))
    );
    println!("  Threshold:     {}", report.threshold);
    let note = if summary.fallback_used {
        " - local fallback".yellow().to_string()
    } else if summary.local_forced {
        " - local mode".to_string()
    } else {
        String::new()
    };
    println!(
        "  Backend:       {} ({}){note}",
        report.backend.name, report.backend.model
    );
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::types::OperatingMode;
    use clap::Parser;

    fn args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["itemmatch", "run", "-i", "in.txt", "-t", "targets.txt"];
        argv.extend_from_slice(extra);
        match crate::cli::Cli::parse_from(argv).command {
            crate::cli::Commands::Run(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_overrides_replace_resolved_values() {
        let mut settings = MatchSettings::default();
        apply_overrides(
            &mut settings,
            &args(&["--mode", "api", "--batch-size", "32", "--sequential"]),
        );
        assert_eq!(settings.mode, OperatingMode::ApiOnly);
        assert_eq!(settings.batch_size, 32);
        assert_eq!(settings.effective_concurrency(), 1);
        assert_eq!(settings.timeout_secs, 45);
    }

    #[test]
    fn test_show_filter() {
        let row = MatchRow {
            status: MatchStatus::NoMatch,
            input_text: "x".to_string(),
            matched_target: None,
            score: 0.1,
        };
        assert!(keep(&row, ShowFilter::All));
        assert!(keep(&row, ShowFilter::NoMatch));
        assert!(!keep(&row, ShowFilter::Match));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a long description", 9), "a long...");
    }
}

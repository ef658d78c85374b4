//! Formatting functions for run output.
//!
//! Pure functions returning strings; `run` decides where they are printed.

use chrono::Duration;
use colored::Colorize;
use std::fmt::Write;
use std::path::Path;

use super::{RepairDependencies, RunOutcome};

/// Banner information shown before the attempt starts.
#[derive(Debug, Clone)]
pub(crate) struct BannerInfo {
    pub transcript: String,
    pub repo: String,
    pub generator: String,
    pub test_command: String,
    pub max_attempts: usize,
}

impl BannerInfo {
    pub fn new(transcript: &Path, deps: &RepairDependencies) -> Self {
        Self {
            transcript: transcript.display().to_string(),
            repo: deps.project_dir.display().to_string(),
            generator: format!("{} ({})", deps.generator.name(), deps.generator.model()),
            test_command: deps.config.verify.command.clone(),
            max_attempts: deps.config.guard.max_attempts,
        }
    }
}

/// Formats a duration for display (e.g., "2m 5s").
pub(crate) fn format_duration(duration: &Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

pub(crate) fn format_banner(info: &BannerInfo) -> String {
    let mut out = String::new();

    writeln!(&mut out, "\n{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "{}", "   🔧 Auto-fix Attempt".yellow().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "  Transcript: {}", info.transcript.cyan()).unwrap();
    writeln!(&mut out, "  Repo:       {}", info.repo.cyan()).unwrap();
    writeln!(&mut out, "  Generator:  {}", info.generator.cyan().bold()).unwrap();
    writeln!(&mut out, "  Tests:      {}", info.test_command.cyan()).unwrap();
    writeln!(
        &mut out,
        "  Attempts:   max {}",
        info.max_attempts.to_string().cyan()
    )
    .unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    out
}

/// Formats the final outcome line plus details.
pub(crate) fn format_outcome(outcome: &RunOutcome, elapsed: &Duration) -> String {
    let mut out = String::new();
    let elapsed = format_duration(elapsed);

    match outcome {
        RunOutcome::Skipped {
            attempts,
            max_attempts,
        } => {
            writeln!(
                &mut out,
                "\n{} Reached max auto-fix attempts ({attempts}/{max_attempts}). Stopping.",
                "🛑".red()
            )
            .unwrap();
        }
        RunOutcome::PatchRejected { reason } => {
            writeln!(&mut out, "\n{} Patch rejected: {}", "⛔".red(), reason.red()).unwrap();
            writeln!(&mut out, "  Nothing was applied.").unwrap();
        }
        RunOutcome::TestsStillFailing { touched } => {
            writeln!(
                &mut out,
                "\n{} Patch applied but tests still failing. Rolled back.",
                "↩".yellow()
            )
            .unwrap();
            write_touched(&mut out, touched);
        }
        RunOutcome::Committed { message, touched } => {
            writeln!(
                &mut out,
                "\n{} Tests passed. Committed \"{}\"",
                "✅".green(),
                message.cyan()
            )
            .unwrap();
            write_touched(&mut out, touched);
        }
    }

    writeln!(&mut out, "  Elapsed: {}", elapsed.dimmed()).unwrap();
    out
}

fn write_touched(out: &mut String, touched: &[String]) {
    for path in touched {
        writeln!(out, "  - {}", path.cyan()).unwrap();
    }
}

/// Formats a hard failure for stderr, including the cause chain.
pub(crate) fn format_error(err: &anyhow::Error) -> String {
    format!("{} {:#}\n", "error:".red().bold(), err)
}

//! Console output for a backup run.
//!
//! - Dimmed colors for routine messages
//! - Bold colors for warnings and errors
//! - An in-place progress line while files are copied
//! - The end-of-run summary, with warnings listed once at the end
//!
//! Diagnostics go through `tracing`; this module only prints what the user
//! asked the tool to do.

mod progress;

use crate::backup::{ProgressReporter, RunPhase, RunSummary, SizeTotals};
use crate::utils::{format_elapsed, format_size};
use colored::Colorize;

pub use progress::Progress;

/// Verbosity level for output messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Suppress informational messages, show only warnings and errors.
    Quiet,
    /// Default verbosity level, show all standard messages.
    #[default]
    Normal,
    /// Show verbose debug messages in addition to standard output.
    Verbose,
}

impl Verbosity {
    #[must_use]
    pub const fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            Self::Quiet
        } else if verbose {
            Self::Verbose
        } else {
            Self::Normal
        }
    }
}

/// Prints an error message in bold red (always shown).
pub fn error(message: &str) {
    eprintln!("{} {message}", "Error:".red().bold());
}

/// Prints a warning message in bold yellow (always shown).
pub fn warning(message: &str) {
    eprintln!("{}", message.yellow().bold());
}

/// Prints an informational message in dimmed color (respects quiet mode).
pub fn info(verbosity: Verbosity, message: &str) {
    if verbosity == Verbosity::Quiet {
        return;
    }
    eprintln!("{}", message.dimmed());
}

/// Progress reporter that draws phases and the progress line on stderr.
pub struct ConsoleReporter {
    verbosity: Verbosity,
    progress: Option<Progress>,
}

impl ConsoleReporter {
    #[must_use]
    pub const fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            progress: None,
        }
    }
}

impl ProgressReporter for ConsoleReporter {
    fn phase(&mut self, phase: RunPhase) {
        if let Some(progress) = self.progress.take() {
            progress.finish();
        }
        match phase {
            RunPhase::Copying if self.verbosity != Verbosity::Quiet => {
                self.progress = Some(Progress::new(&phase.to_string()));
            }
            RunPhase::Copying | RunPhase::Summarizing => {}
            RunPhase::Scanning | RunPhase::PreparingDestination => {
                info(self.verbosity, &format!("{phase}..."));
            }
        }
    }

    fn progress(&mut self, percent: u8, done: &SizeTotals, expected: &SizeTotals) {
        if let Some(progress) = self.progress.as_mut() {
            progress.update(percent, done, expected);
        }
    }
}

/// Lines of the end-of-run summary, without color.
#[must_use]
pub fn summary_lines(summary: &RunSummary) -> Vec<String> {
    let totals = &summary.totals;
    vec![
        format!("Backup written to {}", summary.run_directory.display()),
        format!(
            "  Files:   {} total, {} copied, {} linked, {} skipped",
            totals.files_all,
            totals.files_copied,
            totals.files_linked(),
            totals.files_skipped
        ),
        format!(
            "  Bytes:   {} total, {} copied, {} linked, {} skipped",
            format_size(totals.bytes_all),
            format_size(totals.bytes_copied),
            format_size(totals.bytes_linked()),
            format_size(totals.bytes_skipped)
        ),
        format!("  Elapsed: {}", format_elapsed(summary.elapsed)),
    ]
}

/// Print the summary on stdout and every collected warning on stderr.
pub fn print_summary(summary: &RunSummary, verbosity: Verbosity) {
    if verbosity != Verbosity::Quiet {
        let mut lines = summary_lines(summary).into_iter();
        if let Some(headline) = lines.next() {
            println!("{}", headline.green());
        }
        for line in lines {
            println!("{line}");
        }
    }

    if !summary.warnings.is_empty() {
        warning(&format!("Warnings ({}):", summary.warnings.len()));
        for message in &summary.warnings {
            eprintln!("  {message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_verbosity_from_flags() {
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(true, false), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Quiet);
    }

    #[test]
    fn test_summary_lines() {
        let summary = RunSummary {
            run_directory: PathBuf::from("/backups/2024-05-01_120000.000"),
            totals: SizeTotals {
                files_all: 3,
                files_copied: 2,
                files_skipped: 0,
                bytes_all: 300,
                bytes_copied: 200,
                bytes_skipped: 0,
            },
            expected: SizeTotals::default(),
            elapsed: Duration::from_millis(1250),
            warnings: Vec::new(),
        };

        let lines = summary_lines(&summary);
        assert!(lines[0].ends_with("2024-05-01_120000.000"));
        assert_eq!(
            lines[1],
            "  Files:   3 total, 2 copied, 1 linked, 0 skipped"
        );
        assert_eq!(
            lines[2],
            "  Bytes:   300 B total, 200 B copied, 100 B linked, 0 B skipped"
        );
        assert_eq!(lines[3], "  Elapsed: 1s 250ms");
    }

    #[test]
    fn test_console_reporter_quiet_has_no_progress() {
        let mut reporter = ConsoleReporter::new(Verbosity::Quiet);
        reporter.phase(RunPhase::Copying);
        assert!(reporter.progress.is_none());

        let mut reporter = ConsoleReporter::new(Verbosity::Normal);
        reporter.phase(RunPhase::Copying);
        assert!(reporter.progress.is_some());
        reporter.phase(RunPhase::Summarizing);
        assert!(reporter.progress.is_none());
    }
}

//! In-place progress line for the copying phase.

use crate::backup::SizeTotals;
use crate::utils::format_size;
use colored::Colorize;
use std::io::{self, IsTerminal, Write};

/// A progress line that updates in place on TTY terminals.
///
/// Git style: "Backing up: 100% (6/6 files, 1.20 MB), done."
pub struct Progress {
    /// Title displayed before the percentage
    title: String,
    /// Whether stderr is a TTY (enables inline updating)
    is_tty: bool,
    /// Last displayed percentage
    last_percent: u8,
    /// Files processed / expected at the last update
    files: (u64, u64),
    /// Bytes processed at the last update
    bytes: u64,
    /// Whether anything has been drawn
    started: bool,
}

impl Progress {
    /// Creates a progress line. Nothing is drawn unless stderr is a TTY.
    #[must_use]
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            is_tty: io::stderr().is_terminal(),
            last_percent: 0,
            files: (0, 0),
            bytes: 0,
            started: false,
        }
    }

    /// Redraws the line with a new percentage.
    pub fn update(&mut self, percent: u8, done: &SizeTotals, expected: &SizeTotals) {
        self.last_percent = percent.min(100);
        self.files = (done.files_all, expected.files_all);
        self.bytes = done.bytes_all;

        if self.is_tty {
            self.started = true;
            eprint!(
                "\r{}: {}% ({}/{} files, {})",
                self.title.dimmed(),
                self.last_percent.to_string().dimmed(),
                self.files.0,
                self.files.1,
                format_size(self.bytes)
            );
            let _ = io::stderr().flush();
        }
    }

    /// Completes the line with a final "done" message.
    pub fn finish(mut self) {
        if self.is_tty && self.started {
            eprintln!(
                "\r{}: 100% ({}/{} files, {}), done.",
                self.title.dimmed(),
                self.files.0,
                self.files.1,
                format_size(self.bytes)
            );
        }
        self.started = false;
    }

    #[must_use]
    pub const fn percent(&self) -> u8 {
        self.last_percent
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        // Leave the cursor on a fresh line if the run stopped mid-way.
        if self.is_tty && self.started {
            eprintln!();
        }
    }
}

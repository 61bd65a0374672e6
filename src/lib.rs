#![warn(missing_docs)]
// Allow pedantic strict lints that create false positives in this codebase
#![allow(clippy::arithmetic_side_effects)] // Counters are bounded by file sizes on disk
#![allow(clippy::indexing_slicing)] // Bounds checked by logic

//! # Linkback - Hard-Link Snapshot Backups
//!
//! Every run copies its sources into a fresh timestamped directory. Files
//! whose content is already present in an earlier run, with the same size
//! and modification time, become hard links to that copy instead of new
//! copies, so an unchanged tree costs almost no space.
//!
//! ## Architecture
//!
//! - [`scanner`]: rule evaluation and the lazy tree walk
//! - [`storage`]: the content-addressed dedup index and its persistent store
//! - [`backup`]: the engine that runs one backup end to end
//! - [`linker`]: platform hard-link creation
//! - [`config`]: TOML configuration and the sources-file format
//! - [`output`]: progress and summary display
//!
//! ## Example Usage
//!
//! ```no_run
//! use linkback::backup::{BackupEngine, NoProgress};
//! use linkback::linker::platform_linker;
//! use linkback::scanner::SourceSpec;
//! use linkback::RunContext;
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let engine = BackupEngine::new(RunContext::default(), platform_linker());
//! let summary = engine.run(
//!     &[SourceSpec::new("/home/me/documents")],
//!     Path::new("/mnt/backups"),
//!     &mut NoProgress,
//! )?;
//! println!("{} files linked", summary.totals.files_linked());
//! # Ok(())
//! # }
//! ```

/// Backup orchestration, run totals and progress reporting.
pub mod backup;

/// Command-line interface definitions (argument parsing structures).
pub mod cli;

/// Configuration file and sources-file parsing.
pub mod config;

/// Error taxonomy and exit codes.
pub mod error;

/// Platform hard-link creation.
pub mod linker;

/// Output formatting and progress display.
pub mod output;

/// Rule evaluation and source tree traversal.
pub mod scanner;

/// Dedup index, its persistent store, and file hashing.
pub mod storage;

/// Utility functions and helpers.
pub mod utils;

use config::Config;

/// Current version of the linkback binary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file path relative to home directory.
pub const DEFAULT_CONFIG_PATH: &str = ".config/linkback/config.toml";

/// Hidden directory under the destination root holding the dedup index.
pub const INDEX_DIR: &str = ".linkback-index";

/// Default number of records a physical copy may carry.
pub const DEFAULT_MAX_HARD_LINKS: u32 = 5;

/// Default age in days after which a physical copy is not linked to.
pub const DEFAULT_MAX_HARD_LINK_AGE_DAYS: u32 = 5;

/// Exit code for a successful run.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code for a fatal runtime error.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code for invalid usage (`EX_USAGE`).
pub const EXIT_USAGE: i32 = 64;

/// Resolved policy for one run.
///
/// Built from defaults, the configuration file and command-line flags, then
/// handed to [`backup::BackupEngine`]. Nothing reads configuration from
/// anywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    /// Records allowed per physical copy; `None` for no limit
    pub max_hard_links_per_file: Option<u32>,
    /// Maximum age of a physical copy that may be linked to; `None` for no limit
    pub max_hard_link_age_days: Option<u32>,
    /// Descend into symlinked directories
    pub follow_symlinks: bool,
    /// Size at which hashing switches to a memory map
    pub mmap_threshold: u64,
}

impl RunContext {
    /// Policy described by a configuration file.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            max_hard_links_per_file: config.linking.max_hard_links_per_file.as_option(),
            max_hard_link_age_days: config.linking.max_hard_link_age_days.as_option(),
            follow_symlinks: config.scanning.follow_symlinks,
            mmap_threshold: config.hashing.mmap_threshold,
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

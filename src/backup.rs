//! One backup run, from sizing the job to the final summary.
//!
//! A run moves through [`RunPhase`]s in order and never goes back. Fatal
//! errors (missing sources, unusable destination, index failures) abort the
//! run; a file that cannot be read or copied only adds a warning and is
//! counted as skipped.

use crate::RunContext;
use crate::error::LinkbackError;
use crate::linker::Linker;
use crate::scanner::source::placement_root;
use crate::scanner::{BackupItem, ItemKind, SourceSpec, measure_sources};
use crate::storage::file_ops::{copy_preserving_mtime, hash_file, mtime_nanos};
use crate::storage::index::DedupIndex;
use crate::storage::store::GroupStore;
use crate::utils::ensure_parent_dirs;
use anyhow::Result;
use chrono::Local;
use std::fmt;
use std::fs;
use std::io;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};

/// How many fresh timestamps to try before giving up on a run directory.
const RUN_DIR_ATTEMPTS: usize = 200;
const RUN_DIR_RETRY_DELAY: Duration = Duration::from_millis(25);

/// File and byte counters for a run or part of one.
///
/// Counters add pointwise, so totals for subtrees and sources can be summed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeTotals {
    pub files_all: u64,
    pub files_copied: u64,
    pub files_skipped: u64,
    pub bytes_all: u64,
    pub bytes_copied: u64,
    pub bytes_skipped: u64,
}

impl SizeTotals {
    /// Files that became hard links.
    #[must_use]
    pub const fn files_linked(&self) -> u64 {
        self.files_all
            .saturating_sub(self.files_copied)
            .saturating_sub(self.files_skipped)
    }

    /// Bytes that did not need copying.
    #[must_use]
    pub const fn bytes_linked(&self) -> u64 {
        self.bytes_all
            .saturating_sub(self.bytes_copied)
            .saturating_sub(self.bytes_skipped)
    }
}

impl Add for SizeTotals {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            files_all: self.files_all + other.files_all,
            files_copied: self.files_copied + other.files_copied,
            files_skipped: self.files_skipped + other.files_skipped,
            bytes_all: self.bytes_all + other.bytes_all,
            bytes_copied: self.bytes_copied + other.bytes_copied,
            bytes_skipped: self.bytes_skipped + other.bytes_skipped,
        }
    }
}

impl AddAssign for SizeTotals {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Sum for SizeTotals {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Stage of a run, reported to the [`ProgressReporter`] as it is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Scanning,
    PreparingDestination,
    Copying,
    Summarizing,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Scanning => "Scanning sources",
            Self::PreparingDestination => "Preparing destination",
            Self::Copying => "Backing up",
            Self::Summarizing => "Summarizing",
        };
        f.write_str(label)
    }
}

/// Receives phase changes and progress while a run is in flight.
pub trait ProgressReporter {
    fn phase(&mut self, phase: RunPhase);

    /// Called whenever the whole-number completion percentage grows.
    fn progress(&mut self, percent: u8, done: &SizeTotals, expected: &SizeTotals);
}

/// Reporter that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn phase(&mut self, _phase: RunPhase) {}

    fn progress(&mut self, _percent: u8, _done: &SizeTotals, _expected: &SizeTotals) {}
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Timestamped directory this run wrote into
    pub run_directory: PathBuf,
    pub totals: SizeTotals,
    /// What the scanning phase expected to process
    pub expected: SizeTotals,
    pub elapsed: Duration,
    /// One `"<path>: <reason>"` line per recoverable problem
    pub warnings: Vec<String>,
}

/// Mutable accounting for the copying phase.
struct CopyState {
    totals: SizeTotals,
    expected: SizeTotals,
    warnings: Vec<String>,
    last_percent: u8,
}

impl CopyState {
    fn new(expected: SizeTotals) -> Self {
        Self {
            totals: SizeTotals::default(),
            expected,
            warnings: Vec::new(),
            last_percent: 0,
        }
    }

    fn warn(&mut self, path: &Path, reason: impl fmt::Display) {
        let message = format!("{}: {reason}", path.display());
        warn!("{message}");
        self.warnings.push(message);
    }

    fn skip(&mut self, path: &Path, bytes: u64, reason: impl fmt::Display) {
        self.totals.files_skipped += 1;
        self.totals.bytes_skipped += bytes;
        self.warn(path, reason);
    }

    /// Completion measured in bytes, or in files when there are no bytes.
    fn percent(&self) -> u8 {
        let (done, expected) = if self.expected.bytes_all > 0 {
            (self.totals.bytes_all, self.expected.bytes_all)
        } else {
            (self.totals.files_all, self.expected.files_all)
        };
        if expected == 0 {
            return 100;
        }
        let percent = (u128::from(done) * 100 / u128::from(expected)).min(100);
        u8::try_from(percent).unwrap_or(100)
    }

    fn report(&mut self, reporter: &mut dyn ProgressReporter) {
        let percent = self.percent();
        if percent > self.last_percent {
            self.last_percent = percent;
            reporter.progress(percent, &self.totals, &self.expected);
        }
    }
}

/// Drives backup runs with a fixed policy and linker.
pub struct BackupEngine {
    context: RunContext,
    linker: Box<dyn Linker>,
}

impl BackupEngine {
    #[must_use]
    pub fn new(context: RunContext, linker: Box<dyn Linker>) -> Self {
        Self { context, linker }
    }

    #[must_use]
    pub const fn context(&self) -> &RunContext {
        &self.context
    }

    /// Back up every source into a new timestamped directory under
    /// `destination`.
    ///
    /// # Errors
    ///
    /// Returns a path error if a source is missing or the destination cannot
    /// be prepared, and an index error if the dedup index fails. The index is
    /// persisted on every exit path.
    pub fn run(
        &self,
        sources: &[SourceSpec],
        destination: &Path,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let _span = info_span!("backup", destination = %destination.display()).entered();

        reporter.phase(RunPhase::Scanning);
        // Only an existing destination can hold files the walk would meet.
        let existing_root = fs::canonicalize(destination).ok();
        let expected = measure_sources(
            sources,
            self.context.follow_symlinks,
            existing_root.as_deref(),
        )?;
        info!(
            "Scanned {} sources: {} files, {} bytes",
            sources.len(),
            expected.files_all,
            expected.bytes_all
        );

        reporter.phase(RunPhase::PreparingDestination);
        fs::create_dir_all(destination).map_err(|e| {
            LinkbackError::path(format!(
                "Cannot create destination {}: {e}",
                destination.display()
            ))
        })?;
        let root = fs::canonicalize(destination).map_err(|e| {
            LinkbackError::path(format!(
                "Cannot access destination {}: {e}",
                destination.display()
            ))
        })?;
        let mut index = DedupIndex::open(&root)?;
        let run_directory = create_run_directory(&root)?;
        info!("Writing run into {}", run_directory.display());

        reporter.phase(RunPhase::Copying);
        let mut state = CopyState::new(expected);
        for source in sources {
            self.copy_source(source, &run_directory, &mut index, &mut state, reporter)?;
        }

        reporter.phase(RunPhase::Summarizing);
        index.close()?;

        Ok(RunSummary {
            run_directory,
            totals: state.totals,
            expected,
            elapsed: started.elapsed(),
            warnings: state.warnings,
        })
    }

    fn copy_source<S: GroupStore>(
        &self,
        source: &SourceSpec,
        run_directory: &Path,
        index: &mut DedupIndex<S>,
        state: &mut CopyState,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<()> {
        let _span = info_span!("source", path = %source.path.display()).entered();
        let mut walker = source.walk(self.context.follow_symlinks)?.peekable();

        let placement = match walker.peek() {
            Some(base) => placement_root(run_directory, &base.full_path),
            None => return Ok(()),
        };

        for item in walker {
            // Never back up the backup store into itself.
            if item.full_path.starts_with(index.root()) {
                debug!("Skipping {} inside destination", item.full_path.display());
                continue;
            }

            let target = placement.join(&item.relative_path);
            match item.kind {
                ItemKind::Directory => {
                    fs::create_dir_all(&target).map_err(|e| {
                        LinkbackError::path(format!(
                            "Cannot create directory {}: {e}",
                            target.display()
                        ))
                    })?;
                }
                ItemKind::UnreadableDirectory => {
                    state.warn(&item.full_path, "directory could not be read");
                }
                ItemKind::File => {
                    self.back_up_file(&item, &target, index, state)?;
                    state.report(reporter);
                }
            }
        }
        Ok(())
    }

    /// Hash one file and either link it to an existing copy or copy it.
    ///
    /// Only index and destination-directory failures are returned; anything
    /// wrong with the file itself becomes a warning.
    fn back_up_file<S: GroupStore>(
        &self,
        item: &BackupItem,
        target: &Path,
        index: &mut DedupIndex<S>,
        state: &mut CopyState,
    ) -> Result<()> {
        let metadata = match fs::metadata(&item.full_path) {
            Ok(metadata) => metadata,
            Err(e) => {
                state.totals.files_all += 1;
                state.skip(&item.full_path, 0, e);
                return Ok(());
            }
        };
        let size = metadata.len();
        let modified = mtime_nanos(&metadata);
        state.totals.files_all += 1;
        state.totals.bytes_all += size;

        // Another source with the same name already wrote this path.
        if fs::symlink_metadata(target).is_ok() {
            state.skip(
                &item.full_path,
                size,
                format!("{} already exists in this run", target.display()),
            );
            return Ok(());
        }

        let hash = match hash_file(&item.full_path, self.context.mmap_threshold) {
            Ok(hash) => hash,
            Err(e) => {
                state.skip(&item.full_path, size, format!("{e:#}"));
                return Ok(());
            }
        };

        ensure_parent_dirs(target).map_err(|e| LinkbackError::path(format!("{e:#}")))?;

        let reusable = index.find_reusable_target(
            &hash,
            size,
            modified,
            self.context.max_hard_links_per_file,
            self.context.max_hard_link_age_days,
        )?;

        let mut group = None;
        if let Some(existing) = reusable {
            match self.linker.create_hard_link(target, &existing.path) {
                Ok(()) => {
                    debug!(
                        "Linked {} -> {}",
                        target.display(),
                        existing.path.display()
                    );
                    group = Some(existing.group_id);
                }
                Err(e) => state.warn(&item.full_path, format!("{e:#}; copying instead")),
            }
        }

        if group.is_none() {
            if let Err(e) = copy_preserving_mtime(&item.full_path, target) {
                state.skip(&item.full_path, size, format!("{e:#}"));
                return Ok(());
            }
            debug!("Copied {} ({size} bytes)", item.full_path.display());
            state.totals.files_copied += 1;
            state.totals.bytes_copied += size;
        }

        index.record_backup(target, size, &hash, modified, group)?;
        Ok(())
    }
}

/// Name for a run directory created at the current local time.
#[must_use]
pub fn run_directory_name() -> String {
    Local::now().format("%Y-%m-%d_%H%M%S%.3f").to_string()
}

/// Create a fresh, uniquely named run directory under `root`.
///
/// Another run may have claimed the same millisecond; in that case wait a
/// moment and try again with a new timestamp.
///
/// # Errors
///
/// Returns a path error if the directory cannot be created.
pub fn create_run_directory(root: &Path) -> Result<PathBuf> {
    for attempt in 1..=RUN_DIR_ATTEMPTS {
        let candidate = root.join(run_directory_name());
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(
                    "Run directory {} exists (attempt {attempt})",
                    candidate.display()
                );
                std::thread::sleep(RUN_DIR_RETRY_DELAY);
            }
            Err(e) => {
                return Err(LinkbackError::path(format!(
                    "Cannot create run directory {}: {e}",
                    candidate.display()
                ))
                .into());
            }
        }
    }
    Err(LinkbackError::path(format!(
        "Could not find a free run directory name under {}",
        root.display()
    ))
    .into())
}

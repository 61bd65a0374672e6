use super::rules::RuleSet;
use super::walker::{ItemKind, TreeWalker};
use crate::backup::SizeTotals;
use anyhow::Result;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One source to back up: a file or directory plus the rules filtering it.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub path: PathBuf,
    pub rules: RuleSet,
}

impl SourceSpec {
    /// A source with no rules, so everything beneath it is included.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rules: RuleSet::new(),
        }
    }

    #[must_use]
    pub fn with_rules(path: impl Into<PathBuf>, rules: RuleSet) -> Self {
        Self {
            path: path.into(),
            rules,
        }
    }

    /// Start a walk over this source.
    ///
    /// # Errors
    ///
    /// Returns a path error if the source does not exist.
    pub fn walk(&self, follow_symlinks: bool) -> Result<TreeWalker<'_>> {
        TreeWalker::new(&self.path, &self.rules, follow_symlinks)
    }

    /// Count the files and bytes a run over this source would process.
    ///
    /// Files whose size cannot be read still count, with zero bytes. Files
    /// under `excluded` (the backup root, when it sits inside a source) are
    /// not counted, matching what the copying phase skips.
    ///
    /// # Errors
    ///
    /// Returns a path error if the source does not exist.
    pub fn measure(&self, follow_symlinks: bool, excluded: Option<&Path>) -> Result<SizeTotals> {
        let mut totals = SizeTotals::default();
        for item in self.walk(follow_symlinks)? {
            if item.kind != ItemKind::File
                || excluded.is_some_and(|root| item.full_path.starts_with(root))
            {
                continue;
            }
            let bytes = match std::fs::metadata(&item.full_path) {
                Ok(meta) => meta.len(),
                Err(e) => {
                    debug!("Cannot size {}: {e}", item.full_path.display());
                    0
                }
            };
            totals.files_all += 1;
            totals.bytes_all += bytes;
        }
        debug!(
            "Measured {}: {} files, {} bytes",
            self.path.display(),
            totals.files_all,
            totals.bytes_all
        );
        Ok(totals)
    }
}

/// Size every source in parallel and sum the results.
///
/// # Errors
///
/// Returns the first path error hit by any source.
pub fn measure_sources(
    sources: &[SourceSpec],
    follow_symlinks: bool,
    excluded: Option<&Path>,
) -> Result<SizeTotals> {
    sources
        .par_iter()
        .map(|source| source.measure(follow_symlinks, excluded))
        .try_reduce(SizeTotals::default, |a, b| Ok(a + b))
}

/// Directory under a run directory where a source's items are placed.
///
/// Ordinary sources land directly in the run directory, since their relative
/// paths already start with the source name. A filesystem root has an empty
/// name, so it gets a `<drive>_root` directory instead.
#[must_use]
pub fn placement_root(run_dir: &Path, source_full_path: &Path) -> PathBuf {
    if source_full_path.parent().is_some() {
        return run_dir.to_path_buf();
    }
    run_dir.join(format!("{}_root", drive_letter(source_full_path)))
}

#[cfg(windows)]
fn drive_letter(root: &Path) -> String {
    use std::path::{Component, Prefix};

    match root.components().next() {
        Some(Component::Prefix(prefix)) => match prefix.kind() {
            Prefix::Disk(letter) | Prefix::VerbatimDisk(letter) => {
                char::from(letter).to_string()
            }
            _ => String::new(),
        },
        _ => String::new(),
    }
}

#[cfg(not(windows))]
fn drive_letter(_root: &Path) -> String {
    String::new()
}

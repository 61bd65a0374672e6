#![allow(dead_code)]

use anyhow::Result;
use filetime::FileTime;
use linkback::RunContext;
use linkback::backup::{BackupEngine, NoProgress, RunSummary};
use linkback::linker::platform_linker;
use linkback::scanner::SourceSpec;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Fixed modification time so identical files really are identical.
pub const FIXED_MTIME: i64 = 1_690_000_000;

/// Source tree plus destination root inside one temporary directory
pub struct TestBackup {
    pub temp_dir: TempDir,
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl TestBackup {
    /// Create an empty `source/` and a not-yet-existing `destination/`
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let source = temp_dir.path().join("source");
        let destination = temp_dir.path().join("destination");
        fs::create_dir_all(&source)?;
        Ok(Self {
            temp_dir,
            source,
            destination,
        })
    }

    /// Write a file under the source with the fixed mtime
    pub fn write(&self, relative: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.source.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        filetime::set_file_mtime(&path, FileTime::from_unix_time(FIXED_MTIME, 0))?;
        Ok(path)
    }

    /// Back up the whole source tree with the given policy
    pub fn run(&self, context: RunContext) -> Result<RunSummary> {
        self.run_sources(context, &[SourceSpec::new(&self.source)])
    }

    pub fn run_sources(&self, context: RunContext, sources: &[SourceSpec]) -> Result<RunSummary> {
        BackupEngine::new(context, platform_linker()).run(
            sources,
            &self.destination,
            &mut NoProgress,
        )
    }
}

/// Policy with explicit limits and defaults for everything else
pub fn context(max_links: Option<u32>, max_age_days: Option<u32>) -> RunContext {
    RunContext {
        max_hard_links_per_file: max_links,
        max_hard_link_age_days: max_age_days,
        ..RunContext::default()
    }
}

/// Regular files under `dir`, relative and `/`-separated, sorted
pub fn files_under(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(dir)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    files.sort();
    files
}

/// Number of distinct inodes among the regular files under `dir`
#[cfg(unix)]
pub fn distinct_inodes(dir: &Path) -> usize {
    use std::collections::HashSet;
    use std::os::unix::fs::MetadataExt;

    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| (meta.dev(), meta.ino()))
        .collect::<HashSet<_>>()
        .len()
}

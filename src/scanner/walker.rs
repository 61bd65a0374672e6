//! Lazy, stack-based depth-first walk of a source tree.
//!
//! The walker never recurses and never materialises the tree. Each level on
//! the stack owns two open directory streams (files, then subdirectories)
//! and the allow/deny state inherited by its children. Items come out in
//! pre-order: the base path first, then for each directory its files
//! followed by each subdirectory and that subdirectory's contents.

use super::rules::{RuleEffect, RuleSet, rule_path};
use crate::error::LinkbackError;
use anyhow::Result;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Kind of item produced by the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemKind {
    /// Regular file (or symlink to one)
    File,
    /// Directory that could be opened
    Directory,
    /// Directory whose contents could not be listed
    UnreadableDirectory,
}

/// One entry yielded by [`TreeWalker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupItem {
    pub kind: ItemKind,
    /// Path relative to the directory containing the source, so it starts
    /// with the source's own name (empty for a filesystem root)
    pub relative_path: PathBuf,
    /// Absolute path on disk
    pub full_path: PathBuf,
}

impl BackupItem {
    /// Relative path rendered with `/` separators, as rules see it.
    #[must_use]
    pub fn display_path(&self) -> String {
        rule_path(&self.relative_path)
    }
}

/// Lazy stream over one half of a directory listing.
struct DirStream {
    entries: fs::ReadDir,
    want_dirs: bool,
    follow_symlinks: bool,
}

impl DirStream {
    fn open(path: &Path, want_dirs: bool, follow_symlinks: bool) -> io::Result<Self> {
        Ok(Self {
            entries: fs::read_dir(path)?,
            want_dirs,
            follow_symlinks,
        })
    }

    fn wants(&self, entry: &fs::DirEntry) -> bool {
        let Ok(file_type) = entry.file_type() else {
            return false;
        };

        if file_type.is_symlink() {
            // Links are classified by what they point at; dangling ones are dropped.
            return match fs::metadata(entry.path()) {
                Ok(target) if self.want_dirs => target.is_dir() && self.follow_symlinks,
                Ok(target) => target.is_file(),
                Err(_) => false,
            };
        }

        if self.want_dirs {
            file_type.is_dir()
        } else {
            file_type.is_file()
        }
    }
}

impl Iterator for DirStream {
    type Item = OsString;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.entries.next()? {
                Ok(entry) if self.wants(&entry) => return Some(entry.file_name()),
                Ok(_) => {}
                Err(e) => debug!("Skipping unreadable directory entry: {e}"),
            }
        }
    }
}

/// Traversal state for one directory on the stack.
struct WalkLevel {
    relative_path: PathBuf,
    files: DirStream,
    subdirs: DirStream,
    /// Effective allow/deny state of this directory, inherited by its children
    allowed: bool,
}

fn open_level(
    full_path: &Path,
    relative_path: PathBuf,
    allowed: bool,
    follow_symlinks: bool,
) -> io::Result<WalkLevel> {
    Ok(WalkLevel {
        relative_path,
        files: DirStream::open(full_path, false, follow_symlinks)?,
        subdirs: DirStream::open(full_path, true, follow_symlinks)?,
        allowed,
    })
}

/// Single-pass iterator over the items of one source path.
///
/// Not restartable: once exhausted it keeps returning `None`.
pub struct TreeWalker<'r> {
    rules: &'r RuleSet,
    base_container: PathBuf,
    follow_symlinks: bool,
    /// The base item, handed out by the first call to `next`
    pending: Option<BackupItem>,
    current: Option<WalkLevel>,
    stack: Vec<WalkLevel>,
}

impl<'r> TreeWalker<'r> {
    /// Prepare a walk of `base`, resolving the base item immediately.
    ///
    /// # Errors
    ///
    /// Returns a path error if `base` does not exist, cannot be resolved, or
    /// is neither a regular file nor a directory.
    pub fn new(base: &Path, rules: &'r RuleSet, follow_symlinks: bool) -> Result<Self> {
        let not_found = |e: io::Error| {
            LinkbackError::path(format!(
                "Item not found or not accessible: {} ({e})",
                base.display()
            ))
        };

        let metadata = fs::metadata(base).map_err(not_found)?;
        let base = fs::canonicalize(base).map_err(not_found)?;

        let mut walker = Self {
            rules,
            base_container: PathBuf::new(),
            follow_symlinks,
            pending: None,
            current: None,
            stack: Vec::new(),
        };

        if metadata.is_file() {
            let (container, name) = match (base.parent(), base.file_name()) {
                (Some(parent), Some(name)) => (parent.to_path_buf(), PathBuf::from(name)),
                _ => {
                    return Err(LinkbackError::path(format!(
                        "Cannot determine containing directory of {}",
                        base.display()
                    ))
                    .into());
                }
            };
            walker.base_container = container;
            walker.pending = Some(walker.make_item(ItemKind::File, name));
        } else if metadata.is_dir() {
            // A filesystem root has no container; it becomes its own container
            // and its relative path is empty.
            let (container, relative) = match (base.parent(), base.file_name()) {
                (Some(parent), Some(name)) => (parent.to_path_buf(), PathBuf::from(name)),
                _ => (base.clone(), PathBuf::new()),
            };
            walker.base_container = container;

            match open_level(&base, relative.clone(), true, follow_symlinks) {
                Ok(level) => {
                    walker.current = Some(level);
                    walker.pending = Some(walker.make_item(ItemKind::Directory, relative));
                }
                Err(e) => {
                    debug!("Base directory {} is unreadable: {e}", base.display());
                    walker.pending =
                        Some(walker.make_item(ItemKind::UnreadableDirectory, relative));
                }
            }
        } else {
            return Err(LinkbackError::path(format!(
                "Not a regular file or directory: {}",
                base.display()
            ))
            .into());
        }

        Ok(walker)
    }

    /// Directory that relative paths are measured from.
    #[must_use]
    pub fn base_container(&self) -> &Path {
        &self.base_container
    }

    fn make_item(&self, kind: ItemKind, relative_path: PathBuf) -> BackupItem {
        let full_path = if relative_path.as_os_str().is_empty() {
            self.base_container.clone()
        } else {
            self.base_container.join(&relative_path)
        };
        BackupItem {
            kind,
            relative_path,
            full_path,
        }
    }
}

impl Iterator for TreeWalker<'_> {
    type Item = BackupItem;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(base) = self.pending.take() {
            return Some(base);
        }

        loop {
            let level = self.current.as_mut()?;

            if let Some(name) = level.files.next() {
                let relative = level.relative_path.join(name);
                let effect = self.rules.evaluate_path(&relative, level.allowed);
                if effect.is_allowed() {
                    return Some(self.make_item(ItemKind::File, relative));
                }
                trace!("Excluded file {}", relative.display());
                continue;
            }

            if let Some(name) = level.subdirs.next() {
                let relative = level.relative_path.join(name);
                let effect = self.rules.evaluate_path(&relative, level.allowed);

                if effect == RuleEffect::PruneSubtree {
                    debug!("Pruned subtree {}", relative.display());
                    continue;
                }

                let allowed = effect.is_allowed();
                let full_path = self.base_container.join(&relative);

                match open_level(&full_path, relative.clone(), allowed, self.follow_symlinks) {
                    Ok(child) => {
                        // Denied directories are still descended so that allow
                        // rules can re-include items beneath them.
                        if let Some(parent) = self.current.replace(child) {
                            self.stack.push(parent);
                        }
                        if allowed {
                            return Some(self.make_item(ItemKind::Directory, relative));
                        }
                    }
                    Err(e) => {
                        debug!("Cannot read directory {}: {e}", full_path.display());
                        if allowed {
                            return Some(self.make_item(ItemKind::UnreadableDirectory, relative));
                        }
                    }
                }
                continue;
            }

            self.current = self.stack.pop();
        }
    }
}

impl FusedIterator for TreeWalker<'_> {}

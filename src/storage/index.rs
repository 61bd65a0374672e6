use super::file_ops::mtime_nanos;
use super::store::{GroupStore, JournalStore};
use super::{FileRecord, GroupId, HardLinkMatch, PhysicalCopyGroup};
use crate::error::LinkbackError;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Result of checking a stored record against the file on disk.
enum RecordState {
    /// File is present and unchanged since it was recorded
    Valid,
    /// File is gone or has changed; the record must be pruned
    Stale(String),
}

/// Content-addressed index of the physical copies under one backup root.
///
/// Owns its store for the duration of a run. [`DedupIndex::close`] persists
/// the final state; if the index is dropped without being closed (an error
/// path), the same work happens in `Drop`.
pub struct DedupIndex<S: GroupStore = JournalStore> {
    root: PathBuf,
    store: S,
    closed: bool,
}

impl DedupIndex<JournalStore> {
    /// Open the index kept inside the backup root.
    ///
    /// # Errors
    ///
    /// Returns an index error if the store cannot be opened or is locked by
    /// another run.
    pub fn open(root: &Path) -> Result<Self> {
        let store = JournalStore::open(&root.join(crate::INDEX_DIR))?;
        Ok(Self::with_store(root, store))
    }
}

impl<S: GroupStore> DedupIndex<S> {
    /// Wrap an already-open store. Record paths are relative to `root`.
    pub fn with_store(root: &Path, store: S) -> Self {
        Self {
            root: root.to_path_buf(),
            store,
            closed: false,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Find an existing copy of this content that a new entry may link to.
    ///
    /// Candidate groups are those with the same hash created within
    /// `max_age_days`. They are tried with the emptiest group first and,
    /// among equals, the newest first. Records that no longer match their
    /// files are pruned along the way, and groups left empty are deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or updated.
    pub fn find_reusable_target(
        &mut self,
        hash: &str,
        size: u64,
        modified: i64,
        max_links: Option<u32>,
        max_age_days: Option<u32>,
    ) -> Result<Option<HardLinkMatch>> {
        self.find_reusable_target_at(hash, size, modified, max_links, max_age_days, Utc::now())
    }

    pub(crate) fn find_reusable_target_at(
        &mut self,
        hash: &str,
        size: u64,
        modified: i64,
        max_links: Option<u32>,
        max_age_days: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Option<HardLinkMatch>> {
        // An age reaching past the representable calendar means no cutoff.
        let cutoff = max_age_days.and_then(|days| {
            Duration::try_days(i64::from(days)).and_then(|age| now.checked_sub_signed(age))
        });

        let mut candidates: Vec<PhysicalCopyGroup> = self
            .store
            .groups_with_hash(hash)?
            .into_iter()
            .filter(|group| cutoff.is_none_or(|cutoff| group.created_at >= cutoff))
            .collect();

        candidates.sort_by(|a, b| {
            a.records
                .len()
                .cmp(&b.records.len())
                .then_with(|| b.created_at.cmp(&a.created_at))
        });

        for mut group in candidates {
            let found = self.scan_group(&mut group, size, modified, max_links)?;
            if found.is_some() {
                return Ok(found);
            }
        }

        Ok(None)
    }

    /// Walk a group's records newest first, pruning stale ones.
    ///
    /// Stops at the first usable record when the group has room, and at the
    /// first valid record that differs from the origin file.
    fn scan_group(
        &mut self,
        group: &mut PhysicalCopyGroup,
        size: u64,
        modified: i64,
        max_links: Option<u32>,
    ) -> Result<Option<HardLinkMatch>> {
        let mut found = None;
        let mut pruned = false;

        let mut position = group.records.len();
        while position > 0 {
            position -= 1;
            let full_path = self.root.join(&group.records[position].path);

            match verify_record(&full_path, &group.records[position], group.size) {
                RecordState::Stale(reason) => {
                    debug!("Pruning stale record {}: {reason}", full_path.display());
                    group.records.remove(position);
                    pruned = true;
                }
                RecordState::Valid => {
                    if group.size != size || group.records[position].modified != modified {
                        trace!(
                            "Group {} holds a different version than the origin",
                            group.id
                        );
                        break;
                    }
                    let has_room = max_links.is_none_or(|max| {
                        group.records.len() < usize::try_from(max).unwrap_or(usize::MAX)
                    });
                    if has_room {
                        found = Some(HardLinkMatch {
                            group_id: group.id,
                            path: full_path,
                        });
                        break;
                    }
                    trace!("Group {} is at capacity", group.id);
                }
            }
        }

        if group.records.is_empty() {
            debug!("Deleting empty group {}", group.id);
            self.store.delete(group.id)?;
        } else if pruned {
            self.store.update(group)?;
        }

        Ok(found)
    }

    /// Record that `destination` now holds this content.
    ///
    /// With a `group_id` the entry joins that group as another hard link;
    /// without one it starts a new group as a fresh physical copy. Returns
    /// the id of the group the record was added to.
    ///
    /// # Errors
    ///
    /// Returns an index error if `destination` lies outside the backup root,
    /// the group no longer exists, or the store cannot be written.
    pub fn record_backup(
        &mut self,
        destination: &Path,
        size: u64,
        hash: &str,
        modified: i64,
        group_id: Option<GroupId>,
    ) -> Result<GroupId> {
        let relative = destination.strip_prefix(&self.root).map_err(|_| {
            LinkbackError::index(format!(
                "{} is outside the backup root {}",
                destination.display(),
                self.root.display()
            ))
        })?;
        let record = FileRecord {
            path: relative.to_path_buf(),
            modified,
        };

        if let Some(id) = group_id {
            let mut group = self
                .store
                .get(id)?
                .ok_or_else(|| LinkbackError::index(format!("Group {id} no longer exists")))?;
            group.records.push(record);
            self.store.update(&group)?;
            trace!("Linked {} into group {id}", relative.display());
            return Ok(id);
        }

        let id = self.store.insert(PhysicalCopyGroup {
            id: 0,
            hash: hash.to_string(),
            size,
            created_at: Utc::now(),
            records: vec![record],
        })?;
        trace!("Started group {id} with {}", relative.display());
        Ok(id)
    }

    /// Persist the index and release it.
    ///
    /// # Errors
    ///
    /// Returns an error if the final state cannot be written.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.store.flush()
    }
}

impl<S: GroupStore> Drop for DedupIndex<S> {
    fn drop(&mut self) {
        if !self.closed
            && let Err(e) = self.store.flush()
        {
            warn!("Failed to persist index on shutdown: {e:#}");
        }
    }
}

fn verify_record(full_path: &Path, record: &FileRecord, group_size: u64) -> RecordState {
    let metadata = match fs::metadata(full_path) {
        Ok(metadata) => metadata,
        Err(e) => return RecordState::Stale(format!("not accessible ({e})")),
    };
    if !metadata.is_file() {
        return RecordState::Stale("not a regular file".to_string());
    }
    if metadata.len() != group_size {
        return RecordState::Stale(format!(
            "size {} differs from {group_size}",
            metadata.len()
        ));
    }
    if mtime_nanos(&metadata) != record.modified {
        return RecordState::Stale("modification time changed".to_string());
    }
    RecordState::Valid
}

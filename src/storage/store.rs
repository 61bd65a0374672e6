//! Persistent storage for physical-copy groups.
//!
//! [`JournalStore`] keeps the whole table in memory and makes every mutation
//! durable before returning by appending it to a journal file. Closing the
//! store folds the journal into a fresh snapshot. [`MemoryStore`] offers the
//! same behaviour without touching disk.

use super::{GroupId, PhysicalCopyGroup};
use crate::error::LinkbackError;
use crate::utils::serialization;
use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SNAPSHOT_FILE: &str = "groups.bin";
const JOURNAL_FILE: &str = "journal.bin";
const LOCK_FILE: &str = "lock";

/// Keyed storage with lookup by content hash.
///
/// Mutations must be durable once they return.
pub trait GroupStore {
    /// All groups holding content with this hash, in no particular order.
    fn groups_with_hash(&self, hash: &str) -> Result<Vec<PhysicalCopyGroup>>;

    fn get(&self, id: GroupId) -> Result<Option<PhysicalCopyGroup>>;

    /// Store a new group. The store assigns its id, ignoring `group.id`.
    fn insert(&mut self, group: PhysicalCopyGroup) -> Result<GroupId>;

    /// Replace an existing group with the same id.
    fn update(&mut self, group: &PhysicalCopyGroup) -> Result<()>;

    fn delete(&mut self, id: GroupId) -> Result<()>;

    /// Persist any buffered state. Called once when the index closes.
    fn flush(&mut self) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Single mutation as written to the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum JournalOp {
    Put(PhysicalCopyGroup),
    Delete(GroupId),
}

/// The on-disk snapshot format.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    next_id: GroupId,
    groups: Vec<PhysicalCopyGroup>,
}

const SNAPSHOT_VERSION: u32 = 1;

/// In-memory group table with a hash lookup index.
#[derive(Debug, Default)]
struct GroupTable {
    next_id: GroupId,
    groups: BTreeMap<GroupId, PhysicalCopyGroup>,
    by_hash: HashMap<String, Vec<GroupId>>,
}

impl GroupTable {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut table = Self {
            next_id: snapshot.next_id,
            ..Self::default()
        };
        for group in snapshot.groups {
            table.apply(JournalOp::Put(group));
        }
        table
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            next_id: self.next_id,
            groups: self.groups.values().cloned().collect(),
        }
    }

    fn allocate_id(&mut self) -> GroupId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn apply(&mut self, op: JournalOp) {
        match op {
            JournalOp::Put(group) => {
                self.next_id = self.next_id.max(group.id + 1);
                let ids = self.by_hash.entry(group.hash.clone()).or_default();
                if !ids.contains(&group.id) {
                    ids.push(group.id);
                }
                self.groups.insert(group.id, group);
            }
            JournalOp::Delete(id) => {
                if let Some(group) = self.groups.remove(&id)
                    && let Some(ids) = self.by_hash.get_mut(&group.hash)
                {
                    ids.retain(|existing| *existing != id);
                    if ids.is_empty() {
                        self.by_hash.remove(&group.hash);
                    }
                }
            }
        }
    }

    fn with_hash(&self, hash: &str) -> Vec<PhysicalCopyGroup> {
        self.by_hash
            .get(hash)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.groups.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn contains(&self, id: GroupId) -> bool {
        self.groups.contains_key(&id)
    }
}

/// Volatile store, used for tests and dry lookups.
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: GroupTable,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl GroupStore for MemoryStore {
    fn groups_with_hash(&self, hash: &str) -> Result<Vec<PhysicalCopyGroup>> {
        Ok(self.table.with_hash(hash))
    }

    fn get(&self, id: GroupId) -> Result<Option<PhysicalCopyGroup>> {
        Ok(self.table.groups.get(&id).cloned())
    }

    fn insert(&mut self, mut group: PhysicalCopyGroup) -> Result<GroupId> {
        group.id = self.table.allocate_id();
        let id = group.id;
        self.table.apply(JournalOp::Put(group));
        Ok(id)
    }

    fn update(&mut self, group: &PhysicalCopyGroup) -> Result<()> {
        if !self.table.contains(group.id) {
            return Err(LinkbackError::index(format!("Unknown group {}", group.id)).into());
        }
        self.table.apply(JournalOp::Put(group.clone()));
        Ok(())
    }

    fn delete(&mut self, id: GroupId) -> Result<()> {
        self.table.apply(JournalOp::Delete(id));
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.table.groups.len()
    }
}

/// File-backed store living in a directory of its own.
///
/// Holds an exclusive lock on the directory for its whole lifetime, so two
/// runs against the same destination never interleave.
pub struct JournalStore {
    dir: PathBuf,
    table: GroupTable,
    journal: File,
    /// Held only for its lock
    _lock: File,
    pending_ops: usize,
}

impl JournalStore {
    /// Open (or create) the store in `dir`, replaying any journal left by a
    /// previous run.
    ///
    /// # Errors
    ///
    /// Returns an index error if the directory cannot be created, the lock
    /// cannot be acquired, or the snapshot is unreadable.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            LinkbackError::index(format!(
                "Failed to create index directory {}: {e}",
                dir.display()
            ))
        })?;

        let lock = acquire_lock(&dir.join(LOCK_FILE))?;

        let snapshot_path = dir.join(SNAPSHOT_FILE);
        let mut table = if snapshot_path.exists() {
            let data = fs::read(&snapshot_path).with_context(|| {
                format!("Failed to read index snapshot: {}", snapshot_path.display())
            })?;
            let snapshot: Snapshot = serialization::deserialize(&data).map_err(|e| {
                LinkbackError::index(format!(
                    "Index snapshot {} is corrupt: {e}",
                    snapshot_path.display()
                ))
            })?;
            if snapshot.version != SNAPSHOT_VERSION {
                return Err(LinkbackError::index(format!(
                    "Unsupported index version {} in {}",
                    snapshot.version,
                    snapshot_path.display()
                ))
                .into());
            }
            GroupTable::from_snapshot(snapshot)
        } else {
            GroupTable::default()
        };

        let journal_path = dir.join(JOURNAL_FILE);
        let replayed = replay_journal(&journal_path, &mut table)?;

        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)
            .with_context(|| format!("Failed to open journal: {}", journal_path.display()))?;

        info!(
            "Opened index at {} ({} groups, {replayed} journal entries replayed)",
            dir.display(),
            table.groups.len()
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            table,
            journal,
            _lock: lock,
            pending_ops: replayed,
        })
    }

    fn append(&mut self, op: JournalOp) -> Result<()> {
        let payload = serialization::serialize(&op).context("Failed to serialize journal entry")?;
        let len = u32::try_from(payload.len()).context("Journal entry too large")?;

        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);

        let start = self
            .journal
            .metadata()
            .map_err(|e| LinkbackError::index(format!("Failed to stat journal: {e}")))?
            .len();
        write_frame(&mut self.journal, start, &frame)
            .map_err(|e| LinkbackError::index(format!("Failed to write journal: {e}")))?;

        self.table.apply(op);
        self.pending_ops += 1;
        Ok(())
    }

    /// Write the full table as a new snapshot and empty the journal.
    fn compact(&mut self) -> Result<()> {
        let data = serialization::serialize(&self.table.to_snapshot())
            .context("Failed to serialize index snapshot")?;

        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)
            .context("Failed to create temporary snapshot file")?;
        temp.write_all(&data)
            .context("Failed to write index snapshot")?;
        temp.as_file()
            .sync_all()
            .context("Failed to sync index snapshot")?;
        temp.persist(self.dir.join(SNAPSHOT_FILE))
            .map_err(|e| LinkbackError::index(format!("Failed to replace index snapshot: {e}")))?;

        self.journal
            .set_len(0)
            .and_then(|()| self.journal.sync_all())
            .map_err(|e| LinkbackError::index(format!("Failed to truncate journal: {e}")))?;

        debug!(
            "Compacted {} journal entries into snapshot",
            self.pending_ops
        );
        self.pending_ops = 0;
        Ok(())
    }

    /// Directory holding the snapshot, journal and lock.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl GroupStore for JournalStore {
    fn groups_with_hash(&self, hash: &str) -> Result<Vec<PhysicalCopyGroup>> {
        Ok(self.table.with_hash(hash))
    }

    fn get(&self, id: GroupId) -> Result<Option<PhysicalCopyGroup>> {
        Ok(self.table.groups.get(&id).cloned())
    }

    fn insert(&mut self, mut group: PhysicalCopyGroup) -> Result<GroupId> {
        group.id = self.table.allocate_id();
        let id = group.id;
        self.append(JournalOp::Put(group))?;
        Ok(id)
    }

    fn update(&mut self, group: &PhysicalCopyGroup) -> Result<()> {
        if !self.table.contains(group.id) {
            return Err(LinkbackError::index(format!("Unknown group {}", group.id)).into());
        }
        self.append(JournalOp::Put(group.clone()))
    }

    fn delete(&mut self, id: GroupId) -> Result<()> {
        if !self.table.contains(id) {
            return Ok(());
        }
        self.append(JournalOp::Delete(id))
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending_ops == 0 {
            return Ok(());
        }
        self.compact()
    }

    fn len(&self) -> usize {
        self.table.groups.len()
    }
}

/// Append-only destination for journal frames.
trait JournalSink: Write {
    fn sync(&mut self) -> io::Result<()>;

    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl JournalSink for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write and sync one frame. On failure the sink is cut back to `start`, so
/// a half-written frame never sits in front of later entries.
fn write_frame<W: JournalSink>(out: &mut W, start: u64, frame: &[u8]) -> io::Result<()> {
    let result = out
        .write_all(frame)
        .and_then(|()| out.flush())
        .and_then(|()| out.sync());
    if let Err(e) = result {
        if let Err(undo) = out.truncate_to(start) {
            warn!("Failed to roll back partial journal entry: {undo}");
        }
        return Err(e);
    }
    Ok(())
}

fn acquire_lock(lock_path: &Path) -> Result<File> {
    let lock_timeout = if cfg!(test) {
        Duration::from_millis(100)
    } else {
        Duration::from_secs(30)
    };
    let retry_interval = Duration::from_millis(50);
    let start = Instant::now();

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)
        .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;

    loop {
        match file.try_lock_exclusive() {
            Ok(true) => return Ok(file),
            Ok(false) | Err(_) if start.elapsed() < lock_timeout => {
                std::thread::sleep(retry_interval);
            }
            Ok(false) | Err(_) => {
                return Err(LinkbackError::index(format!(
                    "Index is locked by another backup run ({})",
                    lock_path.display()
                ))
                .into());
            }
        }
    }
}

/// Apply every complete journal entry to `table`, returning how many there were.
///
/// A torn or unreadable tail left by an interrupted run is cut off.
fn replay_journal(path: &Path, table: &mut GroupTable) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let data =
        fs::read(path).with_context(|| format!("Failed to read journal: {}", path.display()))?;

    let mut offset = 0usize;
    let mut applied = 0usize;
    while offset < data.len() {
        let Some(header) = data.get(offset..offset + 4) else {
            break;
        };
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(header);
        let len = u32::from_le_bytes(len_bytes) as usize;

        let Some(payload) = data.get(offset + 4..offset + 4 + len) else {
            break;
        };
        match serialization::deserialize::<JournalOp>(payload) {
            Ok(op) => table.apply(op),
            Err(e) => {
                warn!("Discarding unreadable journal entry at offset {offset}: {e}");
                break;
            }
        }
        offset += 4 + len;
        applied += 1;
    }

    if offset < data.len() {
        warn!(
            "Discarding {} bytes of incomplete journal in {}",
            data.len() - offset,
            path.display()
        );
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open journal: {}", path.display()))?;
        file.set_len(offset as u64)
            .with_context(|| format!("Failed to truncate journal: {}", path.display()))?;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileRecord;
    use chrono::Utc;
    use tempfile::tempdir;

    fn group(hash: &str, paths: &[&str]) -> PhysicalCopyGroup {
        PhysicalCopyGroup {
            id: 0,
            hash: hash.to_string(),
            size: 10,
            created_at: Utc::now(),
            records: paths
                .iter()
                .map(|p| FileRecord {
                    path: PathBuf::from(p),
                    modified: 42,
                })
                .collect(),
        }
    }

    #[test]
    fn test_memory_store_lookup_by_hash() -> Result<()> {
        let mut store = MemoryStore::new();
        let a = store.insert(group("aaa", &["x"]))?;
        let b = store.insert(group("aaa", &["y"]))?;
        store.insert(group("bbb", &["z"]))?;

        assert_ne!(a, b);
        assert_eq!(store.groups_with_hash("aaa")?.len(), 2);
        assert_eq!(store.groups_with_hash("bbb")?.len(), 1);
        assert!(store.groups_with_hash("ccc")?.is_empty());

        store.delete(a)?;
        let remaining = store.groups_with_hash("aaa")?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b);
        Ok(())
    }

    #[test]
    fn test_update_unknown_group_fails() {
        let mut store = MemoryStore::new();
        let mut missing = group("aaa", &["x"]);
        missing.id = 99;
        assert!(store.update(&missing).is_err());
    }

    #[test]
    fn test_journal_survives_reopen_without_flush() -> Result<()> {
        let dir = tempdir()?;
        let index_dir = dir.path().join("idx");

        let id = {
            let mut store = JournalStore::open(&index_dir)?;
            let id = store.insert(group("aaa", &["x"]))?;
            let mut updated = store.get(id)?.unwrap();
            updated.records.push(FileRecord {
                path: PathBuf::from("y"),
                modified: 42,
            });
            store.update(&updated)?;
            store.insert(group("bbb", &["z"]))?;
            id
            // dropped without flush, as after a crash
        };

        let store = JournalStore::open(&index_dir)?;
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(id)?.unwrap().records.len(), 2);
        Ok(())
    }

    #[test]
    fn test_flush_compacts_journal() -> Result<()> {
        let dir = tempdir()?;
        let index_dir = dir.path().join("idx");

        {
            let mut store = JournalStore::open(&index_dir)?;
            store.insert(group("aaa", &["x"]))?;
            store.flush()?;
        }

        assert_eq!(fs::metadata(index_dir.join(JOURNAL_FILE))?.len(), 0);
        assert!(index_dir.join(SNAPSHOT_FILE).exists());

        let mut store = JournalStore::open(&index_dir)?;
        assert_eq!(store.len(), 1);
        // Ids keep increasing across reopen.
        let next = store.insert(group("ccc", &["w"]))?;
        assert_eq!(next, 1);
        Ok(())
    }

    #[test]
    fn test_torn_journal_tail_is_discarded() -> Result<()> {
        let dir = tempdir()?;
        let index_dir = dir.path().join("idx");

        {
            let mut store = JournalStore::open(&index_dir)?;
            store.insert(group("aaa", &["x"]))?;
        }

        let journal_path = index_dir.join(JOURNAL_FILE);
        let good_len = fs::metadata(&journal_path)?.len();
        let mut journal = OpenOptions::new().append(true).open(&journal_path)?;
        journal.write_all(&[200, 0, 0, 0, 1, 2, 3])?;
        drop(journal);

        let store = JournalStore::open(&index_dir)?;
        assert_eq!(store.len(), 1);
        assert_eq!(fs::metadata(&journal_path)?.len(), good_len);
        Ok(())
    }

    #[test]
    fn test_second_open_is_locked_out() -> Result<()> {
        let dir = tempdir()?;
        let index_dir = dir.path().join("idx");

        let _first = JournalStore::open(&index_dir)?;
        let second = JournalStore::open(&index_dir);
        let err = second.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<LinkbackError>(),
            Some(LinkbackError::Index(_))
        ));
        Ok(())
    }

    #[test]
    fn test_corrupt_snapshot_is_index_error() -> Result<()> {
        let dir = tempdir()?;
        let index_dir = dir.path().join("idx");
        fs::create_dir_all(&index_dir)?;
        fs::write(index_dir.join(SNAPSHOT_FILE), [0xff; 3])?;

        let err = JournalStore::open(&index_dir).err().unwrap();
        assert!(err.to_string().contains("corrupt"));
        Ok(())
    }

    /// Accepts a fixed number of bytes, then fails like a full disk.
    struct ShortSink {
        data: Vec<u8>,
        room: usize,
    }

    impl Write for ShortSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.room == 0 {
                return Err(io::Error::other("no space left"));
            }
            let n = buf.len().min(self.room);
            self.data.extend_from_slice(&buf[..n]);
            self.room -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl JournalSink for ShortSink {
        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.data.truncate(usize::try_from(len).unwrap());
            Ok(())
        }
    }

    #[test]
    fn test_failed_append_leaves_no_partial_frame() {
        let mut sink = ShortSink {
            data: vec![1, 2, 3],
            room: 4,
        };
        assert!(write_frame(&mut sink, 3, &[9; 10]).is_err());
        assert_eq!(sink.data, vec![1, 2, 3]);

        sink.room = 10;
        write_frame(&mut sink, 3, &[7; 5]).unwrap();
        assert_eq!(sink.data, vec![1, 2, 3, 7, 7, 7, 7, 7]);
    }
}

/// Content-addressed lookup and recording of physical copies
pub mod index;
/// Persistent group store backends
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifier of a physical-copy group inside a store.
pub type GroupId = u64;

/// One backed-up file, either the physical copy itself or a hard link to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the backup destination root
    pub path: PathBuf,
    /// Modification time of the source when it was backed up, in
    /// nanoseconds since the Unix epoch
    pub modified: i64,
}

/// All records that share one physical copy of some content.
///
/// Records are kept in the order they were added; the most recent is last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalCopyGroup {
    pub id: GroupId,
    /// Lowercase hex SHA-1 of the content
    pub hash: String,
    /// Content length in bytes
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub records: Vec<FileRecord>,
}

/// A verified existing file that a new backup entry can be hard-linked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardLinkMatch {
    pub group_id: GroupId,
    /// Absolute path of the existing file
    pub path: PathBuf,
}

/// File hashing and copying.
///
/// Hashing streams small files through a fixed buffer and memory-maps files
/// at or above the configured threshold.
pub mod file_ops {
    use anyhow::{Context, Result};
    use filetime::FileTime;
    use memmap2::MmapOptions;
    use sha1::{Digest, Sha1};
    use std::fs::{self, File, Metadata, OpenOptions};
    use std::io::{self, Read};
    use std::path::Path;

    /// Default size at which hashing switches to a memory map.
    pub const DEFAULT_MMAP_THRESHOLD: u64 = 1_048_576;

    const READ_BUFFER_SIZE: usize = 64 * 1024;

    /// Lowercase hex SHA-1 of raw bytes.
    #[must_use]
    pub fn hash_bytes(data: &[u8]) -> String {
        hex::encode(Sha1::digest(data))
    }

    /// Computes the SHA-1 of a file's full contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, mapped, or read.
    pub fn hash_file(path: &Path, mmap_threshold: u64) -> Result<String> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open for hashing: {}", path.display()))?;
        let size = file
            .metadata()
            .with_context(|| format!("Failed to get metadata for: {}", path.display()))?
            .len();

        if size > 0 && size >= mmap_threshold {
            // Large file - use memory mapping
            let mmap = unsafe { MmapOptions::new().map(&file) }
                .with_context(|| format!("Failed to map file: {}", path.display()))?;
            return Ok(hash_bytes(&mmap));
        }

        let mut reader = file;
        let mut hasher = Sha1::new();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let read = reader
                .read(&mut buffer)
                .with_context(|| format!("Failed to read file: {}", path.display()))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Modification time of `metadata` in nanoseconds since the Unix epoch.
    #[must_use]
    pub fn mtime_nanos(metadata: &Metadata) -> i64 {
        let mtime = FileTime::from_last_modification_time(metadata);
        mtime
            .unix_seconds()
            .saturating_mul(1_000_000_000)
            .saturating_add(i64::from(mtime.nanoseconds()))
    }

    /// Copies `src` to a new file `dst` and gives the copy the source's
    /// modification time.
    ///
    /// Never writes through an existing `dst`: it may be a hard link shared
    /// with earlier runs. A partially written copy is removed.
    ///
    /// Returns the number of bytes copied.
    ///
    /// # Errors
    ///
    /// Returns an error if `dst` already exists, the copy fails, or the
    /// timestamp cannot be set.
    pub fn copy_preserving_mtime(src: &Path, dst: &Path) -> Result<u64> {
        let mut source = File::open(src)
            .with_context(|| format!("Failed to open for copying: {}", src.display()))?;
        let metadata = source
            .metadata()
            .with_context(|| format!("Failed to get metadata for: {}", src.display()))?;
        let mut target = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dst)
            .with_context(|| format!("Failed to create {}", dst.display()))?;

        let written = io::copy(&mut source, &mut target)
            .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))
            .and_then(|bytes| {
                let mtime = FileTime::from_last_modification_time(&metadata);
                filetime::set_file_handle_times(&target, None, Some(mtime)).with_context(
                    || format!("Failed to set modification time on {}", dst.display()),
                )?;
                target.set_permissions(metadata.permissions()).with_context(|| {
                    format!("Failed to set permissions on {}", dst.display())
                })?;
                Ok(bytes)
            });
        drop(target);

        if written.is_err()
            && let Err(e) = fs::remove_file(dst)
        {
            tracing::debug!("Could not remove partial copy {}: {e}", dst.display());
        }
        written
    }

}

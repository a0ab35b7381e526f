//! Shared table segment
//!
//! The job state table lives in one fixed-size file that any number of
//! processes may attach to. Every access opens the file, takes an exclusive
//! advisory lock on it for the whole read-modify-write and releases the lock
//! when the guard drops.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::table::{table_size, JobStateTable};
use crate::error::Result;

/// Handle on a table file; holds no lock and no open descriptor
#[derive(Debug, Clone)]
pub struct SharedSegment {
    path: PathBuf,
    capacity: usize,
}

impl SharedSegment {
    /// Attach to the table at `path`, creating it with `capacity` slots if
    /// it does not exist. An existing table keeps its own capacity.
    pub fn attach(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut segment = Self { path, capacity };
        let guard = segment.lock()?;
        if guard.is_blank()? {
            guard.store(&JobStateTable::new(capacity))?;
            info!("Created job state table {:?} with {} slots", segment.path, capacity);
        } else {
            let existing = guard.load()?;
            if existing.capacity() != capacity {
                warn!(
                    "Job state table {:?} has {} slots, ignoring requested {}",
                    segment.path,
                    existing.capacity(),
                    capacity
                );
            }
            segment.capacity = existing.capacity();
            debug!(
                "Attached job state table {:?} ({} entries)",
                segment.path,
                existing.len()
            );
        }
        drop(guard);

        Ok(segment)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Open the file and block until the exclusive lock is held
    pub fn lock(&self) -> Result<SegmentGuard> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.lock_exclusive()?;
        Ok(SegmentGuard { file })
    }

    /// Run `f` on the table under the lock, writing the table back if `f`
    /// succeeds and `write_back` is set.
    pub fn with_table<T>(
        &self,
        write_back: bool,
        f: impl FnOnce(&mut JobStateTable) -> Result<T>,
    ) -> Result<T> {
        let guard = self.lock()?;
        let mut table = guard.load()?;
        let value = f(&mut table)?;
        if write_back {
            guard.store(&table)?;
        }
        Ok(value)
    }
}

/// Exclusive lock on the table file, released on drop
pub struct SegmentGuard {
    file: File,
}

impl SegmentGuard {
    fn is_blank(&self) -> Result<bool> {
        Ok(self.file.metadata()?.len() == 0)
    }

    /// Read and decode the whole table
    pub fn load(&self) -> Result<JobStateTable> {
        let mut buf = Vec::new();
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut buf)?;
        JobStateTable::decode(&buf)
    }

    /// Encode and overwrite the whole table
    pub fn store(&self, table: &JobStateTable) -> Result<()> {
        let bytes = table.encode()?;
        debug_assert_eq!(bytes.len(), table_size(table.capacity()));

        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&bytes)?;
        file.set_len(bytes.len() as u64)?;
        file.flush()?;
        Ok(())
    }
}

impl Drop for SegmentGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to unlock job state table: {}", e);
        }
    }
}

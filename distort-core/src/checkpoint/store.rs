//! Crash-recoverable job state store
//!
//! Records the progress of every distortion job so a restarting worker can
//! resume an interrupted upload or report what was in flight. All methods
//! block on the table lock; async callers go through
//! [`run_blocking`](crate::runtime::run_blocking).

use std::path::Path;
use tracing::{debug, info};

use super::segment::SharedSegment;
use super::table::{DistortionJobEntry, JobKey, JobStatus, UpsertOutcome};
use crate::error::Result;

/// Job progress table shared by every process attached to the same file
#[derive(Debug, Clone)]
pub struct JobStateStore {
    segment: SharedSegment,
}

impl JobStateStore {
    /// Attach to (or create) the table at `path`
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        Ok(Self {
            segment: SharedSegment::attach(path, capacity)?,
        })
    }

    pub fn path(&self) -> &Path {
        self.segment.path()
    }

    pub fn capacity(&self) -> usize {
        self.segment.capacity()
    }

    /// Insert or update the entry for the entry's (file, user) identity.
    ///
    /// Fails with [`StoreFull`](crate::DistortError::StoreFull) when the
    /// identity is new and no slot is free; existing entries are untouched.
    pub fn upsert(&self, entry: DistortionJobEntry) -> Result<UpsertOutcome> {
        let key = entry.key();
        let status = entry.status;
        let current_byte = entry.current_byte;

        let outcome = self.segment.with_table(true, |table| table.upsert(entry))?;
        debug!("Job {} {:?}: {} at byte {}", key, outcome, status, current_byte);
        Ok(outcome)
    }

    /// Set status and progress of an existing entry; false if absent
    pub fn update_progress(&self, key: &JobKey, current_byte: u64, status: JobStatus) -> Result<bool> {
        self.segment.with_table(true, |table| {
            let Some(existing) = table.get(key).cloned() else {
                return Ok(false);
            };
            table.upsert(DistortionJobEntry {
                current_byte,
                status,
                ..existing
            })?;
            Ok(true)
        })
    }

    pub fn get(&self, key: &JobKey) -> Result<Option<DistortionJobEntry>> {
        self.segment.with_table(false, |table| Ok(table.get(key).cloned()))
    }

    /// Entries a restarting worker has to recover
    pub fn load_active(&self) -> Result<Vec<DistortionJobEntry>> {
        self.segment.with_table(false, |table| Ok(table.active()))
    }

    /// Remove all DONE entries; returns how many were dropped
    pub fn compact(&self) -> Result<usize> {
        let removed = self.segment.with_table(true, |table| Ok(table.compact()))?;
        if removed > 0 {
            info!("Compacted {} finished job(s) from {:?}", removed, self.path());
        }
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize> {
        self.segment.with_table(false, |table| Ok(table.len()))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DistortError;

    fn entry(file: &str, user: &str, byte: u64, status: JobStatus) -> DistortionJobEntry {
        DistortionJobEntry {
            file_name: file.into(),
            user_name: user.into(),
            md5: "d41d8cd98f00b204e9800998ecf8427e".into(),
            current_byte: byte,
            factor: 3,
            client: 1,
            status,
        }
    }

    #[test]
    fn test_upsert_is_idempotent_per_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStateStore::open(dir.path().join("jobs.tbl"), 8).unwrap();

        store.upsert(entry("f.txt", "bob", 100, JobStatus::InProgress)).unwrap();
        store.upsert(entry("f.txt", "bob", 200, JobStatus::InProgress)).unwrap();

        assert_eq!(store.len().unwrap(), 1);
        let found = store.get(&JobKey::new("f.txt", "bob")).unwrap().unwrap();
        assert_eq!(found.current_byte, 200);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.tbl");

        {
            let store = JobStateStore::open(&path, 8).unwrap();
            store.upsert(entry("a.txt", "amy", 64, JobStatus::InProgress)).unwrap();
            store.upsert(entry("b.txt", "amy", 10, JobStatus::Done)).unwrap();
        }

        let store = JobStateStore::open(&path, 8).unwrap();
        assert_eq!(store.load_active().unwrap().len(), 2);
        assert_eq!(store.compact().unwrap(), 1);
        assert_eq!(store.load_active().unwrap()[0].file_name, "a.txt");
    }

    #[test]
    fn test_update_progress_and_full() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStateStore::open(dir.path().join("jobs.tbl"), 1).unwrap();
        let key = JobKey::new("a.txt", "amy");

        assert!(!store.update_progress(&key, 5, JobStatus::InProgress).unwrap());
        store.upsert(entry("a.txt", "amy", 0, JobStatus::Pending)).unwrap();
        assert!(store.update_progress(&key, 5, JobStatus::InProgress).unwrap());
        assert_eq!(store.get(&key).unwrap().unwrap().current_byte, 5);

        assert!(matches!(
            store.upsert(entry("b.txt", "amy", 0, JobStatus::Pending)),
            Err(DistortError::StoreFull { capacity: 1 })
        ));
    }
}

//! Job state table layout
//!
//! Fixed-capacity table of job progress records with a fixed byte layout so
//! every process attached to the backing file reads the same slots.
//!
//! ```text
//! header  [magic "DJST":4][version:2][reserved:2][capacity:4][count:4]
//! record  [file_name:128][user_name:64][md5:32][current_byte:8][factor:4]
//!         [client:8][status:1][pad:3]
//! ```
//!
//! Integers are big-endian; strings are NUL-padded.

use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

use crate::error::{DistortError, Result};

pub const TABLE_MAGIC: &[u8; 4] = b"DJST";
pub const TABLE_VERSION: u16 = 1;
pub const HEADER_SIZE: usize = 16;

const FILE_NAME_LEN: usize = 128;
const USER_NAME_LEN: usize = 64;
const MD5_LEN: usize = 32;
pub const RECORD_SIZE: usize = FILE_NAME_LEN + USER_NAME_LEN + MD5_LEN + 8 + 4 + 8 + 1 + 3;

/// Byte size of a table file holding `capacity` records
pub const fn table_size(capacity: usize) -> usize {
    HEADER_SIZE + capacity * RECORD_SIZE
}

/// Progress of a distortion job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JobStatus {
    Pending = 0,
    InProgress = 1,
    Done = 2,
}

impl JobStatus {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(JobStatus::Pending),
            1 => Ok(JobStatus::InProgress),
            2 => Ok(JobStatus::Done),
            other => Err(DistortError::StoreCorrupt {
                reason: format!("unknown job status {}", other),
            }),
        }
    }

    /// True for statuses a restarting worker has to account for
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::InProgress | JobStatus::Done)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::InProgress => write!(f, "IN_PROGRESS"),
            JobStatus::Done => write!(f, "DONE"),
        }
    }
}

/// Identity of a job: one entry per (file, user)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub file_name: String,
    pub user_name: String,
}

impl JobKey {
    pub fn new(file_name: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            user_name: user_name.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_name, self.file_name)
    }
}

/// One job progress record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistortionJobEntry {
    pub file_name: String,
    pub user_name: String,
    /// Digest of the uploaded file, 32 hex chars
    pub md5: String,
    /// Bytes of the upload committed so far
    pub current_byte: u64,
    pub factor: u32,
    /// Connection the job arrived on
    pub client: u64,
    pub status: JobStatus,
}

impl DistortionJobEntry {
    pub fn key(&self) -> JobKey {
        JobKey::new(&self.file_name, &self.user_name)
    }

    pub fn matches(&self, key: &JobKey) -> bool {
        self.file_name == key.file_name && self.user_name == key.user_name
    }

    /// Check that every field fits its record slot
    pub fn validate(&self) -> Result<()> {
        check_fixed(&self.file_name, FILE_NAME_LEN, "file name")?;
        check_fixed(&self.user_name, USER_NAME_LEN, "user name")?;
        check_fixed(&self.md5, MD5_LEN, "md5")
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        put_fixed(buf, &self.file_name, FILE_NAME_LEN, "file name")?;
        put_fixed(buf, &self.user_name, USER_NAME_LEN, "user name")?;
        put_fixed(buf, &self.md5, MD5_LEN, "md5")?;
        buf.put_u64(self.current_byte);
        buf.put_u32(self.factor);
        buf.put_u64(self.client);
        buf.put_u8(self.status as u8);
        buf.put_bytes(0, 3);
        Ok(())
    }

    fn decode(mut buf: &[u8]) -> Result<Self> {
        let file_name = get_fixed(&mut buf, FILE_NAME_LEN)?;
        let user_name = get_fixed(&mut buf, USER_NAME_LEN)?;
        let md5 = get_fixed(&mut buf, MD5_LEN)?;
        let current_byte = buf.get_u64();
        let factor = buf.get_u32();
        let client = buf.get_u64();
        let status = JobStatus::from_u8(buf.get_u8())?;

        Ok(Self {
            file_name,
            user_name,
            md5,
            current_byte,
            factor,
            client,
            status,
        })
    }
}

fn check_fixed(value: &str, width: usize, what: &str) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() > width || bytes.contains(&0) {
        return Err(DistortError::invalid_payload(format!(
            "{} {:?} does not fit a {}-byte job record field",
            what, value, width
        )));
    }
    Ok(())
}

fn put_fixed(buf: &mut BytesMut, value: &str, width: usize, what: &str) -> Result<()> {
    check_fixed(value, width, what)?;
    let bytes = value.as_bytes();
    buf.put_slice(bytes);
    buf.put_bytes(0, width - bytes.len());
    Ok(())
}

fn get_fixed(buf: &mut &[u8], width: usize) -> Result<String> {
    let field = &buf[..width];
    let end = field.iter().position(|&b| b == 0).unwrap_or(width);
    let value = std::str::from_utf8(&field[..end])
        .map_err(|_| DistortError::StoreCorrupt {
            reason: "record field is not UTF-8".into(),
        })?
        .to_string();
    buf.advance(width);
    Ok(value)
}

/// Whether an upsert created or updated an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// In-memory image of the table file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStateTable {
    capacity: usize,
    entries: Vec<DistortionJobEntry>,
}

impl JobStateTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DistortionJobEntry] {
        &self.entries
    }

    pub fn get(&self, key: &JobKey) -> Option<&DistortionJobEntry> {
        self.entries.iter().find(|e| e.matches(key))
    }

    /// Update the entry with the same identity in place, or append it.
    pub fn upsert(&mut self, entry: DistortionJobEntry) -> Result<UpsertOutcome> {
        entry.validate()?;
        let key = entry.key();
        if let Some(slot) = self.entries.iter_mut().find(|e| e.matches(&key)) {
            *slot = entry;
            return Ok(UpsertOutcome::Updated);
        }

        if self.entries.len() >= self.capacity {
            return Err(DistortError::StoreFull {
                capacity: self.capacity,
            });
        }
        self.entries.push(entry);
        Ok(UpsertOutcome::Inserted)
    }

    /// Entries a restarting worker has to recover
    pub fn active(&self) -> Vec<DistortionJobEntry> {
        self.entries
            .iter()
            .filter(|e| e.status.is_active())
            .cloned()
            .collect()
    }

    /// Drop DONE entries, keeping the order of the rest. Returns the number
    /// removed.
    pub fn compact(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.status != JobStatus::Done);
        before - self.entries.len()
    }

    pub fn encode(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(table_size(self.capacity));
        buf.put_slice(TABLE_MAGIC);
        buf.put_u16(TABLE_VERSION);
        buf.put_u16(0);
        buf.put_u32(self.capacity as u32);
        buf.put_u32(self.entries.len() as u32);

        for entry in &self.entries {
            entry.encode(&mut buf)?;
        }
        // unused slots stay zeroed
        buf.put_bytes(0, (self.capacity - self.entries.len()) * RECORD_SIZE);
        Ok(buf)
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let corrupt = |reason: String| DistortError::StoreCorrupt { reason };

        if buf.len() < HEADER_SIZE {
            return Err(corrupt(format!("{} bytes is shorter than the header", buf.len())));
        }
        if &buf[..4] != TABLE_MAGIC {
            return Err(corrupt("bad magic".into()));
        }
        buf.advance(4);

        let version = buf.get_u16();
        if version != TABLE_VERSION {
            return Err(corrupt(format!("unsupported version {}", version)));
        }
        buf.advance(2);
        let capacity = buf.get_u32() as usize;
        let count = buf.get_u32() as usize;

        if count > capacity {
            return Err(corrupt(format!("count {} exceeds capacity {}", count, capacity)));
        }
        if capacity.checked_mul(RECORD_SIZE) != Some(buf.len()) {
            return Err(corrupt(format!(
                "{} record bytes for capacity {}",
                buf.len(),
                capacity
            )));
        }

        let entries = buf
            .chunks_exact(RECORD_SIZE)
            .take(count)
            .map(DistortionJobEntry::decode)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { capacity, entries })
    }
}

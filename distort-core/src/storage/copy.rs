//! Raw file copy between files and frame streams
//!
//! Files travel as consecutive `JobData` payloads; these helpers cut a file
//! into payload-sized chunks and append received chunks back to disk.

use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::Result;

/// Reads a file in fixed-size chunks starting at an offset
pub struct ChunkReader {
    file: File,
    chunk_size: usize,
    remaining: u64,
}

impl ChunkReader {
    pub async fn open(path: impl AsRef<Path>, offset: u64, chunk_size: usize) -> Result<Self> {
        let mut file = File::open(path.as_ref()).await?;
        let len = file.metadata().await?.len();
        let start = offset.min(len);
        file.seek(SeekFrom::Start(start)).await?;

        Ok(Self {
            file,
            chunk_size: chunk_size.max(1),
            remaining: len - start,
        })
    }

    /// Bytes not yet returned
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Next chunk, or `None` at end of file
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let want = self.remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; want];
        self.file.read_exact(&mut buf).await?;
        self.remaining -= want as u64;
        Ok(Some(Bytes::from(buf)))
    }
}

/// Appends received chunks to a file, resuming a partial one
pub struct ChunkWriter {
    file: File,
    path: PathBuf,
    written: u64,
}

impl ChunkWriter {
    /// Open `path` positioned at `offset`.
    ///
    /// Anything past `offset` is discarded. A file shorter than `offset`
    /// resumes from its own length; check [`written`](Self::written).
    pub async fn resume(path: impl AsRef<Path>, offset: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;

        let written = file.metadata().await?.len().min(offset);
        file.set_len(written).await?;
        file.seek(SeekFrom::Start(written)).await?;

        Ok(Self {
            file,
            path,
            written,
        })
    }

    /// Start a fresh file, truncating any previous content
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::resume(path, 0).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes in the file so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Append and flush one chunk; returns the new length
    pub async fn append(&mut self, chunk: &[u8]) -> Result<u64> {
        self.file.write_all(chunk).await?;
        self.file.flush().await?;
        self.written += chunk.len() as u64;
        Ok(self.written)
    }

    /// Sync to disk and close
    pub async fn finish(mut self) -> Result<u64> {
        self.file.flush().await?;
        self.file.sync_data().await?;
        Ok(self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chunks_from_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let mut reader = ChunkReader::open(&path, 3, 4).await.unwrap();
        assert_eq!(reader.remaining(), 7);
        assert_eq!(&reader.next_chunk().await.unwrap().unwrap()[..], b"3456");
        assert_eq!(&reader.next_chunk().await.unwrap().unwrap()[..], b"789");
        assert!(reader.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resume_discards_uncommitted_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.part");
        tokio::fs::write(&path, b"committed+junk").await.unwrap();

        let mut writer = ChunkWriter::resume(&path, 9).await.unwrap();
        assert_eq!(writer.written(), 9);
        writer.append(b"!").await.unwrap();
        assert_eq!(writer.finish().await.unwrap(), 10);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"committed!");

        // shorter than the requested offset
        let writer = ChunkWriter::resume(&path, 100).await.unwrap();
        assert_eq!(writer.written(), 10);
    }
}

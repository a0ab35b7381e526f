//! Job submission to a worker
//!
//! Uploads a file in `JobData` chunks, keeping at most [`DATA_WINDOW`]
//! chunks unacknowledged, then receives the distorted output and reports
//! whether its digest matched. An interrupted upload resumes from the offset
//! the worker has committed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::{DistortError, Result};
use crate::protocol::frame::{INVALID, VALID};
use crate::protocol::payload::parse_offset;
use crate::protocol::{
    FrameTransport, FrameType, JobMetadata, JobRequest, WireFrame, WorkerEndpoint, JOB_PROFILE,
};
use crate::runtime::run_blocking;
use crate::storage::{digest_file, ChunkReader, ChunkWriter, Digest};

/// Upper bound on unacknowledged upload chunks
pub const DATA_WINDOW: usize = 16;

const MAX_RESUME_ATTEMPTS: u32 = 3;

/// Result of a finished job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// Where the distorted file was written
    pub output: PathBuf,
    pub file_size: u64,
    pub md5: String,
    /// Offset the first upload attempt started at
    pub resumed_from: u64,
    /// True if the received output matched the worker's digest
    pub valid: bool,
}

/// Connection to a worker's job listener
pub struct JobClient {
    transport: FrameTransport<TcpStream>,
    endpoint: String,
    digest: Arc<dyn Digest>,
}

impl JobClient {
    pub async fn connect(endpoint: &WorkerEndpoint, digest: Arc<dyn Digest>) -> Result<Self> {
        let addr = endpoint.socket_addr();
        Ok(Self {
            transport: FrameTransport::connect(&addr, JOB_PROFILE).await?,
            endpoint: addr,
            digest,
        })
    }

    /// Distort `input` on the worker as `user_name` and write the result to
    /// `output`
    pub async fn submit(
        &mut self,
        user_name: &str,
        input: &Path,
        factor: u32,
        output: &Path,
    ) -> Result<JobOutcome> {
        let file_name = input
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DistortError::invalid_payload(format!("{:?} has no file name", input)))?
            .to_string();
        let file_size = tokio::fs::metadata(input).await?.len();

        let digest = self.digest.clone();
        let path = input.to_path_buf();
        let md5 = run_blocking(move || digest_file(digest.as_ref(), &path)).await?;

        let request = JobRequest {
            user_name: user_name.to_string(),
            file_name,
            file_size,
            md5,
            factor,
        };

        let mut resumed_from = None;
        let mut attempt = 0;
        loop {
            let offset = self.request_offset(&request).await?;
            resumed_from.get_or_insert(offset);

            if self.upload(input, offset, file_size).await? {
                break;
            }
            attempt += 1;
            if attempt >= MAX_RESUME_ATTEMPTS {
                return Err(DistortError::ConnectionFailed {
                    endpoint: self.endpoint.clone(),
                    reason: format!("upload of {} kept failing", request.file_name),
                });
            }
            warn!("Upload of {} interrupted, re-requesting offset", request.file_name);
        }

        let mut outcome = self.download(&request, output).await?;
        outcome.resumed_from = resumed_from.unwrap_or(0);
        Ok(outcome)
    }

    /// Send the job request and return the offset the worker resumes from
    async fn request_offset(&mut self, request: &JobRequest) -> Result<u64> {
        self.transport
            .send_frame(&WireFrame::new(FrameType::JobRequest, request.to_payload()?))
            .await?;
        let reply = self.receive().await?;
        if !reply.is(FrameType::JobRequest) {
            return Err(DistortError::UnexpectedFrame { code: reply.code });
        }

        let offset = parse_offset(&reply.payload)?;
        if offset > request.file_size {
            return Err(DistortError::invalid_payload(format!(
                "offset {} past end of {} byte file",
                offset, request.file_size
            )));
        }
        if offset > 0 {
            info!("Resuming {} at byte {}", request.file_name, offset);
        }
        Ok(offset)
    }

    /// Stream the file from `offset`. False if the worker refused a chunk;
    /// every outstanding reply has been consumed by then.
    async fn upload(&mut self, input: &Path, offset: u64, file_size: u64) -> Result<bool> {
        let mut reader = ChunkReader::open(input, offset, JOB_PROFILE.max_payload()).await?;
        let mut in_flight = 0usize;
        let mut acked = offset;
        let mut refused = false;

        loop {
            while !refused && in_flight < DATA_WINDOW {
                let Some(chunk) = reader.next_chunk().await? else {
                    break;
                };
                self.transport
                    .send_frame(&WireFrame::new(FrameType::JobData, chunk))
                    .await?;
                in_flight += 1;
            }
            if in_flight == 0 {
                break;
            }

            let reply = self.receive().await?;
            in_flight -= 1;
            match reply.frame_type() {
                Some(FrameType::JobRequest) => acked = parse_offset(&reply.payload)?,
                Some(FrameType::Error) => refused = true,
                _ => return Err(DistortError::UnexpectedFrame { code: reply.code }),
            }
        }

        if refused {
            return Ok(false);
        }
        if acked != file_size {
            return Err(DistortError::invalid_payload(format!(
                "worker acknowledged {} of {} bytes",
                acked, file_size
            )));
        }
        debug!("Upload complete, {} bytes acknowledged", acked);
        Ok(true)
    }

    async fn download(&mut self, request: &JobRequest, output: &Path) -> Result<JobOutcome> {
        let reply = self.receive().await?;
        let metadata = match reply.frame_type() {
            Some(FrameType::JobMetadata) => JobMetadata::parse(&reply.payload)?,
            Some(FrameType::JobValidation) => {
                return Err(DistortError::ChecksumMismatch {
                    file: request.file_name.clone(),
                    expected: request.md5.clone(),
                    actual: "rejected by worker".into(),
                });
            }
            Some(FrameType::Error) => {
                return Err(DistortError::DistortionFailed {
                    reason: format!("worker could not distort {}", request.file_name),
                });
            }
            _ => return Err(DistortError::UnexpectedFrame { code: reply.code }),
        };

        let mut writer = ChunkWriter::create(output).await?;
        while writer.written() < metadata.file_size {
            let frame = self.receive().await?;
            if !frame.is(FrameType::JobData) {
                return Err(DistortError::UnexpectedFrame { code: frame.code });
            }
            if writer.written() + frame.payload.len() as u64 > metadata.file_size {
                return Err(DistortError::invalid_payload("output longer than announced"));
            }
            writer.append(&frame.payload).await?;
        }
        writer.finish().await?;

        let digest = self.digest.clone();
        let path = output.to_path_buf();
        let actual = run_blocking(move || digest_file(digest.as_ref(), &path)).await?;
        let valid = actual == metadata.md5;
        if !valid {
            warn!(
                "Output of {} does not match: expected {}, got {}",
                request.file_name, metadata.md5, actual
            );
        }

        let verdict = if valid { VALID } else { INVALID };
        self.transport
            .send_frame(&WireFrame::new(FrameType::JobValidation, verdict))
            .await?;
        let echo = self.receive().await?;
        if !echo.is(FrameType::JobValidation) {
            return Err(DistortError::UnexpectedFrame { code: echo.code });
        }

        info!(
            "Job {} finished: {} bytes, {}",
            request.file_name, metadata.file_size, verdict
        );
        Ok(JobOutcome {
            output: output.to_path_buf(),
            file_size: metadata.file_size,
            md5: metadata.md5,
            resumed_from: 0,
            valid,
        })
    }

    async fn receive(&mut self) -> Result<WireFrame> {
        let frame = self
            .transport
            .receive_frame()
            .await?
            .ok_or_else(|| DistortError::ConnectionFailed {
                endpoint: self.endpoint.clone(),
                reason: "worker closed the connection".into(),
            })?;
        frame.verify()?;
        Ok(frame)
    }

    /// Close the job connection
    pub async fn disconnect(mut self) -> Result<()> {
        self.transport
            .send_frame(&WireFrame::empty(FrameType::Disconnect))
            .await
    }
}

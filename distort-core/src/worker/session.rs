//! Job session on a worker
//!
//! One session per job connection. A pump task drains the socket into a
//! bounded queue; the session takes frames off the queue in order and drives
//! the upload, distortion and download of a job, recording upload progress
//! in the job state store after every chunk.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tracing::{debug, info, warn};

use super::state::WorkerState;
use crate::checkpoint::{DistortionJobEntry, JobKey, JobStateStore, JobStatus};
use crate::data::{pump_frames, BoundedFrameQueue};
use crate::error::{DistortError, Result};
use crate::metrics::standard;
use crate::protocol::frame::{INVALID, STATUS_OK, VALID};
use crate::protocol::{
    FrameReader, FrameType, FrameWriter, JobMetadata, JobRequest, WireFrame, WorkerEndpoint,
    JOB_PROFILE,
};
use crate::runtime::{run_blocking, ShutdownListener};
use crate::storage::{digest_file, verify_file, ChunkReader, ChunkWriter, Digest, Distorter};

/// Everything a job session needs from its worker
pub struct JobContext {
    /// Endpoint handed back for forwarded `Distort` requests
    pub endpoint: WorkerEndpoint,
    /// Where uploads and outputs are kept
    pub directory: PathBuf,
    pub queue_capacity: usize,
    pub store: JobStateStore,
    pub digest: Arc<dyn Digest>,
    pub distorter: Arc<dyn Distorter>,
    pub state: Arc<WorkerState>,
}

impl JobContext {
    /// Files of one user live in their own subdirectory
    fn user_dir(&self, key: &JobKey) -> PathBuf {
        self.directory.join(&key.user_name)
    }

    fn part_path(&self, key: &JobKey) -> PathBuf {
        self.user_dir(key).join(format!("{}.part", key.file_name))
    }

    fn output_path(&self, key: &JobKey) -> PathBuf {
        self.user_dir(key).join(format!("{}.distorted", key.file_name))
    }
}

struct Upload {
    request: JobRequest,
    key: JobKey,
    writer: ChunkWriter,
}

enum Phase {
    Idle,
    Receiving(Upload),
    /// A chunk was lost; data is refused until the client re-requests
    Desynced,
    AwaitingValidation(JobKey),
}

/// Serve one job connection until the peer disconnects or shutdown fires
pub async fn serve_job_connection<S>(
    stream: S,
    peer: SocketAddr,
    ctx: Arc<JobContext>,
    mut shutdown: ShutdownListener,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, write) = tokio::io::split(stream);
    let queue = Arc::new(BoundedFrameQueue::new(ctx.queue_capacity));

    let pump = {
        let queue = queue.clone();
        let mut reader = FrameReader::new(read, JOB_PROFILE);
        tokio::spawn(async move { pump_frames(&mut reader, &queue).await })
    };

    let mut session = JobSession {
        ctx,
        writer: FrameWriter::new(write, JOB_PROFILE),
        peer,
        phase: Phase::Idle,
    };

    let result = loop {
        let frame = tokio::select! {
            _ = shutdown.recv() => {
                let _ = session.send(&WireFrame::empty(FrameType::Disconnect)).await;
                break Ok(());
            }
            frame = queue.dequeue() => frame,
        };

        let Some(frame) = frame else {
            break Ok(());
        };
        match session.handle(frame).await {
            Ok(true) => {}
            Ok(false) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    pump.abort();
    if let Err(e) = &result {
        warn!("Job session with {} ended: {}", peer, e);
    } else {
        debug!("Job session with {} closed", peer);
    }
    result
}

struct JobSession<S> {
    ctx: Arc<JobContext>,
    writer: FrameWriter<WriteHalf<S>>,
    peer: SocketAddr,
    phase: Phase,
}

impl<S> JobSession<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn send(&mut self, frame: &WireFrame) -> Result<()> {
        self.writer.send_frame(frame).await
    }

    /// Handle one frame; false ends the session
    async fn handle(&mut self, frame: WireFrame) -> Result<bool> {
        if let Err(e) = frame.verify() {
            standard::CHECKSUM_FAILURES.inc();
            warn!("{}: discarding frame {:?}: {}", self.peer, frame, e);
            if let Phase::Receiving(upload) = &self.phase {
                info!("{}: upload of {} desynced", self.peer, upload.key);
                self.phase = Phase::Desynced;
            }
            self.send(&WireFrame::error()).await?;
            return Ok(true);
        }

        match frame.frame_type() {
            Some(FrameType::Distort) => {
                let payload = self.ctx.endpoint.to_payload()?;
                self.send(&WireFrame::new(FrameType::Distort, payload)).await?;
            }
            Some(FrameType::CheckStatus) => {
                self.send(&WireFrame::new(FrameType::CheckStatus, STATUS_OK)).await?;
            }
            Some(FrameType::JobRequest) => match JobRequest::parse(&frame.payload) {
                Ok(request) => self.start_upload(request).await?,
                Err(e) => {
                    warn!("{}: bad job request: {}", self.peer, e);
                    self.send(&WireFrame::error()).await?;
                }
            },
            Some(FrameType::JobData) => self.receive_chunk(&frame).await?,
            Some(FrameType::JobValidation) => self.finish_job(&frame).await?,
            Some(FrameType::Error) => {
                // stands in for a frame the pump dropped
                if let Phase::Receiving(upload) = &self.phase {
                    info!("{}: upload of {} desynced", self.peer, upload.key);
                    self.phase = Phase::Desynced;
                }
                self.send(&WireFrame::error()).await?;
            }
            Some(FrameType::Disconnect) => return Ok(false),
            _ => self.send(&WireFrame::unrecognized()).await?,
        }
        Ok(true)
    }

    /// Begin or resume an upload and reply with the offset to continue from
    async fn start_upload(&mut self, request: JobRequest) -> Result<()> {
        if !is_plain_name(&request.file_name) || !is_plain_name(&request.user_name) {
            warn!("{}: refusing job for {:?}", self.peer, request.file_name);
            return self.send(&WireFrame::error()).await;
        }

        let key = JobKey::new(&request.file_name, &request.user_name);
        let store = self.ctx.store.clone();
        let lookup = key.clone();
        let existing = run_blocking(move || store.get(&lookup)).await?;

        let committed = match existing {
            Some(entry)
                if entry.status != JobStatus::Done
                    && entry.md5 == request.md5
                    && entry.factor == request.factor =>
            {
                entry.current_byte.min(request.file_size)
            }
            _ => 0,
        };

        tokio::fs::create_dir_all(self.ctx.user_dir(&key)).await?;
        let writer = ChunkWriter::resume(self.ctx.part_path(&key), committed).await?;
        let offset = writer.written();

        let entry = DistortionJobEntry {
            file_name: request.file_name.clone(),
            user_name: request.user_name.clone(),
            md5: request.md5.clone(),
            current_byte: offset,
            factor: request.factor,
            client: u64::from(self.peer.port()),
            status: if offset == 0 {
                JobStatus::Pending
            } else {
                JobStatus::InProgress
            },
        };
        let store = self.ctx.store.clone();
        if let Err(e) = run_blocking(move || store.upsert(entry)).await {
            warn!("{}: cannot track job {}: {}", self.peer, key, e);
            self.phase = Phase::Idle;
            return self.send(&WireFrame::error()).await;
        }

        if offset > 0 {
            info!("{}: resuming {} at byte {} of {}", self.peer, key, offset, request.file_size);
        } else {
            info!("{}: new job {} ({} bytes)", self.peer, key, request.file_size);
            self.ctx.state.job_started();
        }

        self.phase = Phase::Receiving(Upload {
            request,
            key,
            writer,
        });
        self.ack(offset).await
    }

    async fn ack(&mut self, offset: u64) -> Result<()> {
        self.send(&WireFrame::new(FrameType::JobRequest, offset.to_string()))
            .await?;

        let complete = matches!(
            &self.phase,
            Phase::Receiving(upload) if upload.writer.written() == upload.request.file_size
        );
        if complete {
            if let Phase::Receiving(upload) = std::mem::replace(&mut self.phase, Phase::Idle) {
                self.complete_upload(upload).await?;
            }
        }
        Ok(())
    }

    async fn receive_chunk(&mut self, frame: &WireFrame) -> Result<()> {
        let upload = match &mut self.phase {
            Phase::Receiving(upload) => upload,
            _ => {
                debug!("{}: job data outside an upload", self.peer);
                return self.send(&WireFrame::error()).await;
            }
        };

        let after = upload.writer.written() + frame.payload.len() as u64;
        if after > upload.request.file_size {
            warn!(
                "{}: {} overran its declared size {}",
                self.peer, upload.key, upload.request.file_size
            );
            self.phase = Phase::Desynced;
            return self.send(&WireFrame::error()).await;
        }

        let offset = upload.writer.append(&frame.payload).await?;
        standard::BYTES_RECEIVED.inc_by(frame.payload.len() as u64);
        self.ctx.state.add_bytes_received(frame.payload.len() as u64);

        let store = self.ctx.store.clone();
        let key = upload.key.clone();
        run_blocking(move || store.update_progress(&key, offset, JobStatus::InProgress)).await?;

        self.ack(offset).await
    }

    /// Verify the upload, distort it and stream the result back
    async fn complete_upload(&mut self, upload: Upload) -> Result<()> {
        let Upload {
            request,
            key,
            writer,
        } = upload;
        let part = writer.path().to_path_buf();
        writer.finish().await?;

        let digest = self.ctx.digest.clone();
        let expected = request.md5.clone();
        let input = part.clone();
        if let Err(e) = run_blocking(move || verify_file(digest.as_ref(), &input, &expected)).await {
            warn!("{}: upload of {} rejected: {}", self.peer, key, e);
            self.ctx.state.job_rejected();
            self.reset_job(&key, &part).await?;
            return self.send(&WireFrame::new(FrameType::JobValidation, INVALID)).await;
        }

        let output = self.ctx.output_path(&key);
        let metadata = match self.distort(&part, &output, request.factor).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("{}: distortion of {} failed: {}", self.peer, key, e);
                return self.send(&WireFrame::error()).await;
            }
        };

        self.send(&WireFrame::new(FrameType::JobMetadata, metadata.to_payload()?))
            .await?;

        let mut reader = ChunkReader::open(&output, 0, JOB_PROFILE.max_payload()).await?;
        while let Some(chunk) = reader.next_chunk().await? {
            self.send(&WireFrame::new(FrameType::JobData, chunk)).await?;
        }

        debug!(
            "{}: sent {} bytes of output for {}",
            self.peer, metadata.file_size, key
        );
        self.phase = Phase::AwaitingValidation(key);
        Ok(())
    }

    async fn distort(&self, input: &Path, output: &Path, factor: u32) -> Result<JobMetadata> {
        let distorter = self.ctx.distorter.clone();
        let digest = self.ctx.digest.clone();
        let input = input.to_path_buf();
        let output = output.to_path_buf();

        run_blocking(move || {
            let file_size = distorter.distort(&input, &output, factor)?;
            let md5 = digest_file(digest.as_ref(), &output)?;
            Ok(JobMetadata { file_size, md5 })
        })
        .await
    }

    async fn finish_job(&mut self, frame: &WireFrame) -> Result<()> {
        let key = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::AwaitingValidation(key) => key,
            other => {
                self.phase = other;
                debug!("{}: validation without a finished job", self.peer);
                return self.send(&WireFrame::error()).await;
            }
        };

        if frame.carries(VALID) {
            let store = self.ctx.store.clone();
            let done = key.clone();
            run_blocking(move || {
                let Some(entry) = store.get(&done)? else {
                    return Ok(false);
                };
                store.update_progress(&done, entry.current_byte, JobStatus::Done)
            })
            .await?;
            standard::JOBS_COMPLETED.inc();
            self.ctx.state.job_completed();
            info!("{}: job {} done", self.peer, key);
            self.send(&WireFrame::new(FrameType::JobValidation, VALID)).await
        } else {
            warn!("{}: client rejected output of {}", self.peer, key);
            self.ctx.state.job_rejected();
            let part = self.ctx.part_path(&key);
            self.reset_job(&key, &part).await?;
            self.send(&WireFrame::new(FrameType::JobValidation, INVALID)).await
        }
    }

    /// Forget upload progress so the next request starts from zero
    async fn reset_job(&self, key: &JobKey, part: &Path) -> Result<()> {
        let store = self.ctx.store.clone();
        let reset = key.clone();
        run_blocking(move || store.update_progress(&reset, 0, JobStatus::Pending)).await?;

        if let Err(e) = tokio::fs::remove_file(part).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(DistortError::Io(e));
            }
        }
        Ok(())
    }
}

/// A single path component that cannot escape the job directory
fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

//! Client side of the protocol
//!
//! [`CoordinatorClient`] asks the coordinator where a file should go;
//! [`JobClient`] runs the job against the worker it was sent to.

pub mod batch;
pub mod job;

pub use batch::{run_batch, BatchReport, ClientConfig, OUTPUT_DIR};
pub use job::{JobClient, JobOutcome, DATA_WINDOW};

use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::{DistortError, Result};
use crate::protocol::frame::{CONNECTED, INVALID_MEDIA_TYPE, NO_WORKER_AVAILABLE, STATUS_OK};
use crate::protocol::{
    DistortRequest, FrameTransport, FrameType, WireFrame, WireProfile, WorkerClass,
    WorkerEndpoint,
};

/// Coordinator answer to a `Distort` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistortReply {
    /// Job endpoint of the worker serving the file's class
    Worker(WorkerEndpoint),
    NoWorkerAvailable,
    InvalidMediaType,
}

/// Connection to the coordinator's client listener
pub struct CoordinatorClient {
    transport: FrameTransport<TcpStream>,
    addr: String,
}

impl CoordinatorClient {
    /// Connect and perform the `Connect` handshake
    pub async fn connect(addr: &str, profile: WireProfile) -> Result<Self> {
        let mut client = Self {
            transport: FrameTransport::connect(addr, profile).await?,
            addr: addr.to_string(),
        };

        let reply = client.request(WireFrame::empty(FrameType::Connect)).await?;
        if !reply.carries(CONNECTED) {
            return Err(DistortError::ConnectionFailed {
                endpoint: addr.to_string(),
                reason: "handshake refused".into(),
            });
        }
        info!("Connected to coordinator {}", addr);
        Ok(client)
    }

    /// Send one frame and return the verified reply
    pub async fn request(&mut self, frame: WireFrame) -> Result<WireFrame> {
        let reply = self.transport.request(&frame).await?;
        reply.verify()?;
        if reply.is(FrameType::Error) {
            return Err(DistortError::ConnectionFailed {
                endpoint: self.addr.clone(),
                reason: "coordinator reported a protocol error".into(),
            });
        }
        Ok(reply)
    }

    /// True if the coordinator answers the status check
    pub async fn check_status(&mut self) -> Result<bool> {
        let reply = self.request(WireFrame::empty(FrameType::CheckStatus)).await?;
        Ok(reply.carries(STATUS_OK))
    }

    /// Ask which worker should distort `file_name`
    pub async fn distort(&mut self, class: WorkerClass, file_name: &str) -> Result<DistortReply> {
        let payload = DistortRequest::new(class.as_str(), file_name).to_payload()?;
        let reply = self.request(WireFrame::new(FrameType::Distort, payload)).await?;

        if reply.carries(NO_WORKER_AVAILABLE) {
            debug!("No {} worker for {}", class, file_name);
            return Ok(DistortReply::NoWorkerAvailable);
        }
        if reply.carries(INVALID_MEDIA_TYPE) {
            return Ok(DistortReply::InvalidMediaType);
        }
        if !reply.is(FrameType::Distort) {
            return Err(DistortError::UnexpectedFrame { code: reply.code });
        }
        Ok(DistortReply::Worker(WorkerEndpoint::parse(&reply.payload)?))
    }

    /// Tell the coordinator we are leaving and close the connection
    pub async fn disconnect(mut self) -> Result<()> {
        self.transport
            .send_frame(&WireFrame::empty(FrameType::Disconnect))
            .await
    }
}

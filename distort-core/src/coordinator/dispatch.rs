//! Dispatch engine
//!
//! Interprets one frame from a connection against the worker registry and
//! produces exactly one reply frame for it, relaying `Distort` requests to
//! the primary worker of the file's class.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::acceptor::ListenerClass;
use super::registry::{WorkerInfo, WorkerRegistry};
use super::session::ConnectionMeta;
use crate::error::{DistortError, Result};
use crate::metrics::standard;
use crate::protocol::frame::{
    CONNECTED, INVALID_MEDIA_TYPE, NO_WORKER_AVAILABLE, REGISTER_FAILED, STATUS_OK,
};
use crate::protocol::{
    DistortRequest, FrameTransport, FrameType, RegisterRequest, WireFrame, WireProfile,
    WorkerClass, JOB_PROFILE,
};

/// Per-frame command processor shared by all connections
pub struct DispatchEngine {
    registry: Arc<WorkerRegistry>,
    profile: WireProfile,
    forward_timeout: Option<Duration>,
}

impl DispatchEngine {
    /// Create an engine routing through `registry`.
    ///
    /// With `forward_timeout` unset a relayed request waits for the worker's
    /// reply for as long as the worker connection stays open.
    pub fn new(
        registry: Arc<WorkerRegistry>,
        profile: WireProfile,
        forward_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            profile,
            forward_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn profile(&self) -> WireProfile {
        self.profile
    }

    /// Verify a received frame and compute its reply.
    ///
    /// A checksum mismatch discards the frame and answers with an error frame.
    pub async fn process(&self, frame: &WireFrame, conn: &ConnectionMeta) -> WireFrame {
        if let Err(e) = frame.verify() {
            standard::CHECKSUM_FAILURES.inc();
            warn!("{}: discarding frame {:?}: {}", conn.id, frame, e);
            return WireFrame::error();
        }
        self.dispatch(frame, conn).await
    }

    /// Compute the reply for an already verified frame
    pub async fn dispatch(&self, frame: &WireFrame, conn: &ConnectionMeta) -> WireFrame {
        match frame.frame_type() {
            Some(FrameType::Connect) => {
                debug!("{}: client handshake from {}", conn.id, conn.peer);
                WireFrame::new(FrameType::Connect, CONNECTED)
            }
            Some(FrameType::Register) => self.handle_register(frame, conn),
            Some(FrameType::Distort) => self.handle_distort(frame, conn).await,
            Some(FrameType::CheckStatus) => WireFrame::new(FrameType::CheckStatus, STATUS_OK),
            _ => {
                debug!("{}: command {:#04x} not recognized", conn.id, frame.code);
                WireFrame::unrecognized()
            }
        }
    }

    fn handle_register(&self, frame: &WireFrame, conn: &ConnectionMeta) -> WireFrame {
        let failed = || WireFrame::new(FrameType::Register, REGISTER_FAILED);

        if conn.listener != ListenerClass::Registrar {
            warn!("{}: registration attempted on the client listener", conn.id);
            return failed();
        }

        let request = match RegisterRequest::parse(&frame.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("{}: bad registration: {}", conn.id, e);
                return failed();
            }
        };

        let worker = WorkerInfo::new(request.ip, request.port, request.class, conn.id);
        match self.registry.register(worker) {
            Ok(_) => WireFrame::empty(FrameType::Register),
            Err(e) => {
                warn!("{}: registration refused: {}", conn.id, e);
                failed()
            }
        }
    }

    async fn handle_distort(&self, frame: &WireFrame, conn: &ConnectionMeta) -> WireFrame {
        let marker = |text: &'static str| WireFrame::new(FrameType::Distort, text);

        let worker = match self.route(frame) {
            Ok(worker) => worker,
            Err(DistortError::RegistryMiss { class }) => {
                standard::ROUTING_MISSES.inc();
                info!("{}: no {} worker available", conn.id, class);
                return marker(NO_WORKER_AVAILABLE);
            }
            Err(e) => {
                standard::ROUTING_MISSES.inc();
                info!("{}: {}", conn.id, e);
                return marker(INVALID_MEDIA_TYPE);
            }
        };

        match self.forward(&worker, frame).await {
            Ok(reply) => {
                standard::DISPATCHES_RELAYED.inc();
                debug!("{}: relayed reply from {}", conn.id, worker.endpoint());
                reply
            }
            Err(e) => {
                warn!("{}: forwarding to {} failed: {}", conn.id, worker.endpoint(), e);
                marker(NO_WORKER_AVAILABLE)
            }
        }
    }

    /// Resolve the worker for a `Distort` payload.
    ///
    /// The declared media type must match the class of the file extension.
    fn route(&self, frame: &WireFrame) -> Result<WorkerInfo> {
        let request = DistortRequest::parse(&frame.payload)?;
        let requested: WorkerClass = request.media_type.parse()?;

        if WorkerClass::from_file_name(&request.file_name) != Some(requested) {
            return Err(DistortError::InvalidMediaType {
                media_type: format!("{} for {}", request.media_type, request.file_name),
            });
        }

        self.registry.lookup_by_file_extension(&request.file_name)
    }

    /// Send `frame` verbatim to `worker`'s job listener on a fresh connection
    /// and return its single reply. The connection is closed afterwards.
    async fn forward(&self, worker: &WorkerInfo, frame: &WireFrame) -> Result<WireFrame> {
        let start = Instant::now();
        let endpoint = worker.endpoint();

        let exchange = async {
            let mut transport = FrameTransport::connect(&endpoint, JOB_PROFILE).await?;
            transport.request(frame).await
        };

        let reply = match self.forward_timeout {
            Some(limit) => tokio::time::timeout(limit, exchange).await.map_err(|_| {
                DistortError::ConnectionFailed {
                    endpoint: endpoint.clone(),
                    reason: format!("no reply within {:?}", limit),
                }
            })??,
            None => exchange.await?,
        };

        standard::FORWARD_DURATION.observe_since(start);
        reply.verify()?;
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::registry::ConnectionId;
    use crate::protocol::WorkerEndpoint;
    use tokio::net::TcpListener;

    fn meta(listener: ListenerClass, id: u64) -> ConnectionMeta {
        ConnectionMeta {
            id: ConnectionId(id),
            listener,
            peer: "127.0.0.1:1".parse().unwrap(),
        }
    }

    fn engine() -> DispatchEngine {
        DispatchEngine::new(Arc::new(WorkerRegistry::new(4)), WireProfile::Binary, None)
    }

    fn register_frame(class: WorkerClass, port: u16) -> WireFrame {
        let payload = RegisterRequest {
            class,
            ip: "127.0.0.1".into(),
            port,
        }
        .to_payload()
        .unwrap();
        WireFrame::new(FrameType::Register, payload)
    }

    fn distort_frame(media_type: &str, file_name: &str) -> WireFrame {
        let payload = DistortRequest::new(media_type, file_name).to_payload().unwrap();
        WireFrame::new(FrameType::Distort, payload)
    }

    #[tokio::test]
    async fn test_register_only_on_registrar_listener() {
        let engine = engine();
        let frame = register_frame(WorkerClass::Text, 9000);

        let reply = engine.dispatch(&frame, &meta(ListenerClass::Client, 1)).await;
        assert!(reply.carries(REGISTER_FAILED));
        assert!(engine.registry().is_empty());

        let reply = engine.dispatch(&frame, &meta(ListenerClass::Registrar, 2)).await;
        assert!(reply.is(FrameType::Register));
        assert_eq!(reply.data_length(), 0);
        assert_eq!(engine.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_media_type_must_match_extension() {
        let engine = engine();
        engine
            .dispatch(&register_frame(WorkerClass::Text, 9000), &meta(ListenerClass::Registrar, 1))
            .await;

        let client = meta(ListenerClass::Client, 2);
        for frame in [
            distort_frame("MEDIA", "notes.txt"),
            distort_frame("VIDEO", "notes.txt"),
            distort_frame("TEXT", "archive.zip"),
        ] {
            let reply = engine.dispatch(&frame, &client).await;
            assert!(reply.carries(INVALID_MEDIA_TYPE));
        }

        let reply = engine.dispatch(&distort_frame("MEDIA", "photo.jpg"), &client).await;
        assert!(reply.carries(NO_WORKER_AVAILABLE));
    }

    #[tokio::test]
    async fn test_unreachable_worker_reports_no_worker() {
        // grab a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let engine = engine();
        engine
            .dispatch(&register_frame(WorkerClass::Text, port), &meta(ListenerClass::Registrar, 1))
            .await;

        let reply = engine
            .dispatch(&distort_frame("TEXT", "notes.txt"), &meta(ListenerClass::Client, 2))
            .await;
        assert!(reply.carries(NO_WORKER_AVAILABLE));
    }

    #[tokio::test]
    async fn test_relay_is_verbatim() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let endpoint = WorkerEndpoint {
            ip: "127.0.0.1".into(),
            port: 9100,
        };
        let worker_reply = WireFrame::new(FrameType::Distort, endpoint.to_payload().unwrap());
        let expected = worker_reply.clone();

        let fake_worker = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut transport = FrameTransport::new(stream, JOB_PROFILE);
            let request = transport.receive_frame().await.unwrap().unwrap();
            transport.send_frame(&worker_reply).await.unwrap();
            request
        });

        let engine = engine();
        engine
            .dispatch(&register_frame(WorkerClass::Text, port), &meta(ListenerClass::Registrar, 1))
            .await;

        let request = distort_frame("TEXT", "notes.txt");
        let reply = engine.dispatch(&request, &meta(ListenerClass::Client, 2)).await;
        assert_eq!(reply, expected);
        assert_eq!(fake_worker.await.unwrap(), request);
    }
}

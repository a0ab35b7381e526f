//! Per-connection session on the coordinator
//!
//! Reads frames one at a time, hands each to the [`DispatchEngine`] and
//! writes its reply before reading the next. Registrations made over the
//! connection are withdrawn when it closes.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use super::acceptor::ListenerClass;
use super::dispatch::DispatchEngine;
use super::registry::ConnectionId;
use crate::error::DistortError;
use crate::metrics::standard;
use crate::protocol::{FrameTransport, FrameType, WireFrame};
use crate::runtime::ShutdownListener;

/// Identity of the connection a frame arrived on
#[derive(Debug, Clone, Copy)]
pub struct ConnectionMeta {
    pub id: ConnectionId,
    pub listener: ListenerClass,
    pub peer: SocketAddr,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Peer closed the stream or sent `Disconnect`
    PeerClosed,
    /// Coordinator is shutting down
    Shutdown,
    /// Transport failure
    Failed,
}

/// Serve one connection until it closes
pub async fn serve_connection<S>(
    stream: S,
    meta: ConnectionMeta,
    engine: Arc<DispatchEngine>,
    mut shutdown: ShutdownListener,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let profile = engine.profile();
    let mut transport = FrameTransport::new(stream, profile);
    standard::OPEN_CONNECTIONS.inc();

    let end = loop {
        let received = tokio::select! {
            _ = shutdown.recv() => break SessionEnd::Shutdown,
            r = transport.receive_frame() => r,
        };

        let frame = match received {
            Ok(Some(frame)) => frame,
            Ok(None) => break SessionEnd::PeerClosed,
            Err(e) if e.is_decode() => {
                standard::DECODE_FAILURES.inc();
                warn!("{}: undecodable frame: {}", meta.id, e);
                if transport.send_frame(&WireFrame::error()).await.is_err() {
                    break SessionEnd::Failed;
                }
                continue;
            }
            Err(e) => {
                debug!("{}: read failed: {}", meta.id, e);
                break SessionEnd::Failed;
            }
        };
        standard::FRAMES_RECEIVED.inc();

        if frame.is(FrameType::Disconnect) {
            debug!("{}: peer sent disconnect", meta.id);
            break SessionEnd::PeerClosed;
        }

        let reply = tokio::select! {
            _ = shutdown.recv() => break SessionEnd::Shutdown,
            reply = engine.process(&frame, &meta) => reply,
        };

        if let Err(e) = transport.send_frame(&reply).await {
            debug!("{}: write failed: {}", meta.id, e);
            break SessionEnd::Failed;
        }
    };

    if end == SessionEnd::Shutdown {
        let _ = transport.send_frame(&WireFrame::empty(FrameType::Disconnect)).await;
    }

    match engine.registry().unregister_by_connection(meta.id) {
        Ok(removed) => info!(
            "{}: closed, withdrew {} worker registration(s)",
            meta.id,
            removed.len()
        ),
        Err(DistortError::WorkerNotRegistered { .. }) => {
            debug!("{} {} connection closed ({:?})", meta.listener, meta.id, end)
        }
        Err(e) => warn!("{}: cleanup failed: {}", meta.id, e),
    }

    standard::OPEN_CONNECTIONS.dec();
    end
}

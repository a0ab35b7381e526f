//! Registration with the coordinator
//!
//! A worker registers over the coordinator's registrar listener and keeps
//! that connection open for as long as it serves jobs; the coordinator drops
//! the registration when the connection closes.

use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::{DistortError, Result};
use crate::protocol::frame::REGISTER_FAILED;
use crate::protocol::{FrameTransport, FrameType, RegisterRequest, WireFrame, WireProfile, WorkerClass};
use crate::runtime::ShutdownListener;

/// How a held registration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationEnd {
    /// Local shutdown; the coordinator was told
    Shutdown,
    /// The coordinator announced its own shutdown
    CoordinatorShutdown,
}

/// Live registration with the coordinator
pub struct Registration {
    transport: FrameTransport<TcpStream>,
    registrar_addr: String,
}

impl Registration {
    /// Connect to `registrar_addr` and register as a `class` worker reachable
    /// at `ip:port`.
    pub async fn register(
        registrar_addr: &str,
        profile: WireProfile,
        class: WorkerClass,
        ip: &str,
        port: u16,
    ) -> Result<Self> {
        let mut transport = FrameTransport::connect(registrar_addr, profile).await?;
        let payload = RegisterRequest {
            class,
            ip: ip.to_string(),
            port,
        }
        .to_payload()?;

        let reply = transport
            .request(&WireFrame::new(FrameType::Register, payload))
            .await?;
        reply.verify()?;

        if !reply.is(FrameType::Register) {
            return Err(DistortError::UnexpectedFrame { code: reply.code });
        }
        if reply.carries(REGISTER_FAILED) || reply.data_length() != 0 {
            return Err(DistortError::ConnectionFailed {
                endpoint: registrar_addr.to_string(),
                reason: "registration refused".into(),
            });
        }

        info!("Registered as {} worker {}:{} with {}", class, ip, port, registrar_addr);
        Ok(Self {
            transport,
            registrar_addr: registrar_addr.to_string(),
        })
    }

    /// Hold the registration open until shutdown or until the coordinator
    /// goes away. Losing the connection without a `Disconnect` is an error.
    pub async fn hold(mut self, mut shutdown: ShutdownListener) -> Result<RegistrationEnd> {
        loop {
            let received = tokio::select! {
                _ = shutdown.recv() => {
                    let _ = self
                        .transport
                        .send_frame(&WireFrame::empty(FrameType::Disconnect))
                        .await;
                    debug!("Withdrew registration with {}", self.registrar_addr);
                    return Ok(RegistrationEnd::Shutdown);
                }
                r = self.transport.receive_frame() => r,
            };

            match received {
                Ok(Some(frame)) if frame.is(FrameType::Disconnect) => {
                    info!("Coordinator {} is shutting down", self.registrar_addr);
                    return Ok(RegistrationEnd::CoordinatorShutdown);
                }
                Ok(Some(frame)) => {
                    warn!("Ignoring {:?} on the registration connection", frame);
                }
                Ok(None) => {
                    return Err(DistortError::ConnectionFailed {
                        endpoint: self.registrar_addr.clone(),
                        reason: "coordinator closed the registration".into(),
                    });
                }
                Err(e) if e.is_decode() => warn!("Bad frame from coordinator: {}", e),
                Err(e) => return Err(e),
            }
        }
    }
}

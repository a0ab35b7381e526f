//! Connection acceptor
//!
//! Owns the client and registrar listeners and hands out accepted
//! connections tagged with a fresh [`ConnectionId`] and the listener they
//! arrived on. Both listeners are polled together so a burst on one never
//! starves the other.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use super::registry::ConnectionId;
use crate::error::{DistortError, Result};

/// Which listener a connection was accepted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerClass {
    /// Clients submitting `Connect`, `Distort` and `CheckStatus`
    Client,
    /// Workers joining the pool
    Registrar,
}

impl fmt::Display for ListenerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerClass::Client => write!(f, "client"),
            ListenerClass::Registrar => write!(f, "registrar"),
        }
    }
}

/// A newly accepted connection
#[derive(Debug)]
pub struct Accepted {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub listener: ListenerClass,
    pub id: ConnectionId,
}

/// Listener pair for the coordinator
pub struct Acceptor {
    client: TcpListener,
    registrar: TcpListener,
    next_id: AtomicU64,
}

impl Acceptor {
    /// Bind both listeners
    pub async fn bind(client_addr: &str, registrar_addr: &str) -> Result<Self> {
        let client = bind_listener(client_addr).await?;
        let registrar = bind_listener(registrar_addr).await?;

        info!(
            "Listening for clients on {} and workers on {}",
            client.local_addr()?,
            registrar.local_addr()?
        );

        Ok(Self {
            client,
            registrar,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn client_addr(&self) -> Result<SocketAddr> {
        Ok(self.client.local_addr()?)
    }

    pub fn registrar_addr(&self) -> Result<SocketAddr> {
        Ok(self.registrar.local_addr()?)
    }

    /// Wait for the next connection on either listener.
    ///
    /// When both are ready the branch is chosen at random.
    pub async fn accept(&self) -> Result<Accepted> {
        let (result, listener) = tokio::select! {
            r = self.client.accept() => (r, ListenerClass::Client),
            r = self.registrar.accept() => (r, ListenerClass::Registrar),
        };

        let (stream, peer) = result?;
        stream.set_nodelay(true)?;
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!("Accepted {} connection {} from {}", listener, id, peer);

        Ok(Accepted {
            stream,
            peer,
            listener,
            id,
        })
    }
}

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| DistortError::ConnectionFailed {
            endpoint: addr.to_string(),
            reason: format!("bind failed: {}", e),
        })
}

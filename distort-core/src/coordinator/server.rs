//! Coordinator server
//!
//! Binds the listener pair, accepts connections and runs one session task
//! per connection until shutdown.

use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::acceptor::Acceptor;
use super::dispatch::DispatchEngine;
use super::registry::WorkerRegistry;
use super::session::{serve_connection, ConnectionMeta};
use crate::error::Result;
use crate::protocol::WireProfile;
use crate::runtime::ShutdownSignal;

/// Configuration for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Address clients connect to
    pub client_addr: String,
    /// Address workers register on
    pub registrar_addr: String,
    /// Wire profile of client and registrar connections
    pub profile: WireProfile,
    /// Upper bound on registered workers
    pub max_workers: usize,
    /// Bound on the wait for a worker's reply to a relayed request
    pub forward_timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            client_addr: "0.0.0.0:9000".into(),
            registrar_addr: "0.0.0.0:9001".into(),
            profile: WireProfile::default(),
            max_workers: crate::DEFAULT_MAX_WORKERS,
            forward_timeout: None,
        }
    }
}

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Bound, accept loop not started
    Idle,
    /// Accepting connections
    Running,
    /// Draining sessions
    ShuttingDown,
    /// All sessions finished
    Stopped,
}

/// Main coordinator
pub struct Coordinator {
    acceptor: Acceptor,
    engine: Arc<DispatchEngine>,
    state: RwLock<CoordinatorState>,
}

impl Coordinator {
    /// Bind both listeners
    pub async fn bind(config: CoordinatorConfig) -> Result<Self> {
        let acceptor = Acceptor::bind(&config.client_addr, &config.registrar_addr).await?;
        let registry = Arc::new(WorkerRegistry::new(config.max_workers));
        let engine = Arc::new(DispatchEngine::new(
            registry,
            config.profile,
            config.forward_timeout,
        ));

        Ok(Self {
            acceptor,
            engine,
            state: RwLock::new(CoordinatorState::Idle),
        })
    }

    pub fn client_addr(&self) -> Result<SocketAddr> {
        self.acceptor.client_addr()
    }

    pub fn registrar_addr(&self) -> Result<SocketAddr> {
        self.acceptor.registrar_addr()
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        self.engine.registry()
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.read()
    }

    /// Accept and serve connections until `shutdown` fires, then wait for
    /// every session to finish.
    pub async fn run(&self, shutdown: ShutdownSignal) -> Result<()> {
        *self.state.write() = CoordinatorState::Running;
        let mut stop = shutdown.subscribe();
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = stop.recv() => break,
                accepted = self.acceptor.accept() => match accepted {
                    Ok(conn) => {
                        let meta = ConnectionMeta {
                            id: conn.id,
                            listener: conn.listener,
                            peer: conn.peer,
                        };
                        sessions.spawn(serve_connection(
                            conn.stream,
                            meta,
                            self.engine.clone(),
                            shutdown.subscribe(),
                        ));
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!("Session task failed: {}", e);
                    }
                }
            }
        }

        *self.state.write() = CoordinatorState::ShuttingDown;
        info!("Coordinator draining {} session(s)", sessions.len());
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                error!("Session task failed: {}", e);
            }
        }

        *self.state.write() = CoordinatorState::Stopped;
        info!("Coordinator stopped");
        Ok(())
    }
}

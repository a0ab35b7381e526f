//! Worker server
//!
//! Recovers job state, binds the job listener, registers with the
//! coordinator and serves job connections until shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::client::{Registration, RegistrationEnd};
use super::session::{serve_job_connection, JobContext};
use super::state::{WorkerPhase, WorkerState};
use crate::checkpoint::JobStateStore;
use crate::error::{DistortError, Result};
use crate::protocol::{WireProfile, WorkerClass, WorkerEndpoint};
use crate::runtime::{run_blocking, ShutdownSignal};
use crate::storage::{Digest, Distorter};

/// Configuration for a worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub class: WorkerClass,
    /// Job listener bind address
    pub listen_addr: String,
    /// IP advertised to the coordinator
    pub advertise_ip: String,
    /// Coordinator registrar; `None` serves jobs without registering
    pub registrar_addr: Option<String>,
    /// Upload and output directory
    pub directory: PathBuf,
    /// Wire profile of the registration connection
    pub profile: WireProfile,
    pub queue_capacity: usize,
    pub store_path: PathBuf,
    pub store_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            class: WorkerClass::Text,
            listen_addr: "0.0.0.0:9100".into(),
            advertise_ip: "127.0.0.1".into(),
            registrar_addr: Some("127.0.0.1:9001".into()),
            directory: PathBuf::from("."),
            profile: WireProfile::default(),
            queue_capacity: crate::DEFAULT_QUEUE_CAPACITY,
            store_path: PathBuf::from("distort-jobs.tbl"),
            store_capacity: crate::DEFAULT_STORE_CAPACITY,
        }
    }
}

/// Worker process
pub struct WorkerServer {
    config: WorkerConfig,
    listener: TcpListener,
    ctx: Arc<JobContext>,
    state: Arc<WorkerState>,
}

impl WorkerServer {
    /// Recover the job store and bind the job listener
    pub async fn bind(
        config: WorkerConfig,
        digest: Arc<dyn Digest>,
        distorter: Arc<dyn Distorter>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.directory).await?;

        let store_path = config.store_path.clone();
        let capacity = config.store_capacity;
        let store = run_blocking(move || JobStateStore::open(store_path, capacity)).await?;
        recover(&store).await?;

        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|e| DistortError::ConnectionFailed {
                endpoint: config.listen_addr.clone(),
                reason: format!("bind failed: {}", e),
            })?;
        let port = listener.local_addr()?.port();
        info!(
            "{} worker accepting jobs on {} (advertised {}:{})",
            config.class,
            listener.local_addr()?,
            config.advertise_ip,
            port
        );

        let state = Arc::new(WorkerState::new());
        let ctx = Arc::new(JobContext {
            endpoint: WorkerEndpoint {
                ip: config.advertise_ip.clone(),
                port,
            },
            directory: config.directory.clone(),
            queue_capacity: config.queue_capacity,
            store,
            digest,
            distorter,
            state: state.clone(),
        });

        Ok(Self {
            config,
            listener,
            ctx,
            state,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> &Arc<WorkerState> {
        &self.state
    }

    pub fn store(&self) -> &JobStateStore {
        &self.ctx.store
    }

    /// Register and serve until shutdown or until the coordinator is lost
    pub async fn run(&self, shutdown: ShutdownSignal) -> Result<()> {
        let registration = match &self.config.registrar_addr {
            Some(addr) => {
                let registration = Registration::register(
                    addr,
                    self.config.profile,
                    self.config.class,
                    &self.ctx.endpoint.ip,
                    self.ctx.endpoint.port,
                )
                .await;
                match registration {
                    Ok(registration) => Some(registration),
                    Err(e) => {
                        self.state.set_phase(WorkerPhase::Failed).await;
                        return Err(e);
                    }
                }
            }
            None => None,
        };
        self.state
            .set_phase(if registration.is_some() {
                WorkerPhase::Registered
            } else {
                WorkerPhase::Standalone
            })
            .await;

        let held = shutdown.subscribe();
        let hold = async move {
            match registration {
                Some(registration) => registration.hold(held).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(hold);

        let mut stop = shutdown.subscribe();
        let mut sessions = JoinSet::new();
        let mut outcome = Ok(());

        loop {
            tokio::select! {
                _ = stop.recv() => break,
                ended = &mut hold => {
                    match ended {
                        Ok(RegistrationEnd::Shutdown) => {}
                        Ok(RegistrationEnd::CoordinatorShutdown) => {
                            info!("Coordinator left, stopping");
                        }
                        Err(e) => {
                            error!("Lost coordinator registration: {}", e);
                            outcome = Err(e);
                        }
                    }
                    // sessions stop with the rest of the process
                    shutdown.shutdown();
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("set_nodelay for {} failed: {}", peer, e);
                        }
                        sessions.spawn(serve_job_connection(
                            stream,
                            peer,
                            self.ctx.clone(),
                            shutdown.subscribe(),
                        ));
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!("Job session task failed: {}", e);
                    }
                }
            }
        }

        if outcome.is_err() {
            self.state.set_phase(WorkerPhase::Failed).await;
        } else {
            self.state.set_phase(WorkerPhase::ShuttingDown).await;
        }
        info!("Worker draining {} job session(s)", sessions.len());
        while sessions.join_next().await.is_some() {}

        let store = self.ctx.store.clone();
        if let Err(e) = run_blocking(move || store.compact()).await {
            warn!("Job state compaction on shutdown failed: {}", e);
        }
        info!(
            "Worker stopped: {} job(s) started, {} completed",
            self.state.jobs_started(),
            self.state.jobs_completed()
        );
        outcome
    }
}

/// Report jobs left by a previous run and drop finished ones
async fn recover(store: &JobStateStore) -> Result<()> {
    let store = store.clone();
    run_blocking(move || {
        let active = store.load_active()?;
        for entry in &active {
            info!(
                "Recovered job {} ({}) at byte {}, factor {}",
                entry.key(),
                entry.status,
                entry.current_byte,
                entry.factor
            );
        }
        let removed = store.compact()?;
        info!(
            "Job state table {:?}: {} recovered, {} finished removed",
            store.path(),
            active.len(),
            removed
        );
        Ok(())
    })
    .await
}

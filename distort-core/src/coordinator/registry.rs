//! Worker registry
//!
//! Tracks connected workers by class and the primary worker each class
//! routes to. Every mutation happens under one lock; the lock is never held
//! across network I/O.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::{DistortError, Result};
use crate::metrics::standard;
use crate::protocol::WorkerClass;

/// Identity of one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Information about a registered worker
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    /// Host the worker accepts jobs on
    pub host: String,
    /// Port the worker accepts jobs on
    pub port: u16,
    /// Class of jobs it handles
    pub class: WorkerClass,
    /// Connection the worker registered over
    pub connection: ConnectionId,
    /// Registration time
    pub registered_at: Instant,
}

impl WorkerInfo {
    pub fn new(host: impl Into<String>, port: u16, class: WorkerClass, connection: ConnectionId) -> Self {
        Self {
            host: host.into(),
            port,
            class,
            connection,
            registered_at: Instant::now(),
        }
    }

    /// `host:port` for an outbound connection
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Default)]
struct RegistryState {
    /// Workers in registration order
    workers: Vec<WorkerInfo>,
    /// Primary worker per class, by connection
    primaries: HashMap<WorkerClass, ConnectionId>,
}

impl RegistryState {
    fn find(&self, class: WorkerClass, connection: ConnectionId) -> Option<&WorkerInfo> {
        self.workers
            .iter()
            .find(|w| w.class == class && w.connection == connection)
    }
}

/// Authoritative map of connected workers
pub struct WorkerRegistry {
    state: Mutex<RegistryState>,
    capacity: usize,
}

impl WorkerRegistry {
    /// Create a registry admitting at most `capacity` workers
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            capacity,
        }
    }

    /// Register a worker.
    ///
    /// The worker becomes its class's primary only if the class has none;
    /// later registrations of the same class never displace it. Returns true
    /// if the worker became primary.
    pub fn register(&self, worker: WorkerInfo) -> Result<bool> {
        let mut state = self.state.lock();
        if state.workers.len() >= self.capacity {
            return Err(DistortError::RegistryFull {
                capacity: self.capacity,
            });
        }

        let became_primary = !state.primaries.contains_key(&worker.class);
        if became_primary {
            state.primaries.insert(worker.class, worker.connection);
        }

        info!(
            "Registered {} worker {} on {} (primary={})",
            worker.class,
            worker.endpoint(),
            worker.connection,
            became_primary
        );
        state.workers.push(worker);
        standard::REGISTERED_WORKERS.set(state.workers.len() as i64);

        Ok(became_primary)
    }

    /// Resolve the worker for a file by its extension.
    ///
    /// Unknown extensions yield [`DistortError::InvalidMediaType`]; a known
    /// class without a primary yields [`DistortError::RegistryMiss`].
    pub fn lookup_by_file_extension(&self, file_name: &str) -> Result<WorkerInfo> {
        let class = WorkerClass::from_file_name(file_name).ok_or_else(|| {
            DistortError::InvalidMediaType {
                media_type: file_name.to_string(),
            }
        })?;

        self.primary(class).ok_or_else(|| DistortError::RegistryMiss {
            class: class.to_string(),
        })
    }

    /// Snapshot of the primary worker of a class
    pub fn primary(&self, class: WorkerClass) -> Option<WorkerInfo> {
        let state = self.state.lock();
        let connection = *state.primaries.get(&class)?;
        state.find(class, connection).cloned()
    }

    /// Remove every worker registered over `connection`.
    ///
    /// Clears the primary of any class whose primary was removed; no other
    /// worker is promoted in its place.
    pub fn unregister_by_connection(&self, connection: ConnectionId) -> Result<Vec<WorkerInfo>> {
        let mut state = self.state.lock();

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.workers)
            .into_iter()
            .partition(|w| w.connection == connection);
        state.workers = kept;

        if removed.is_empty() {
            return Err(DistortError::WorkerNotRegistered {
                connection: connection.0,
            });
        }

        for worker in &removed {
            if state.primaries.get(&worker.class) == Some(&connection) {
                state.primaries.remove(&worker.class);
                info!("Primary {} worker {} removed, class has no primary", worker.class, worker.endpoint());
            } else {
                debug!("Removed {} worker {}", worker.class, worker.endpoint());
            }
        }
        standard::REGISTERED_WORKERS.set(state.workers.len() as i64);

        Ok(removed)
    }

    /// Number of registered workers
    pub fn len(&self) -> usize {
        self.state.lock().workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of all registered workers in registration order
    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.state.lock().workers.clone()
    }
}

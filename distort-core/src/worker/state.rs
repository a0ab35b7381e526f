//! Worker state machine
//!
//! Tracks the worker's lifecycle phase and job counters.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Worker status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Recovering job state, binding the job listener
    Initializing,
    /// Registered with the coordinator
    Registered,
    /// Serving job connections without a coordinator registration
    Standalone,
    /// Draining job connections
    ShuttingDown,
    /// Lost the coordinator or failed to start
    Failed,
}

/// Local worker state
pub struct WorkerState {
    phase: RwLock<WorkerPhase>,
    jobs_started: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_rejected: AtomicU64,
    bytes_received: AtomicU64,
}

impl WorkerState {
    pub fn new() -> Self {
        Self {
            phase: RwLock::new(WorkerPhase::Initializing),
            jobs_started: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_rejected: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    pub async fn phase(&self) -> WorkerPhase {
        *self.phase.read().await
    }

    pub async fn set_phase(&self, phase: WorkerPhase) {
        *self.phase.write().await = phase;
    }

    pub fn job_started(&self) {
        self.jobs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Upload failed digest check or the client rejected the output
    pub fn job_rejected(&self) {
        self.jobs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn jobs_started(&self) -> u64 {
        self.jobs_started.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_rejected(&self) -> u64 {
        self.jobs_rejected.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::new()
    }
}

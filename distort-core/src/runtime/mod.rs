//! Process lifecycle helpers
//!
//! Shutdown signaling shared by the coordinator, worker and client roles,
//! and offload of blocking work from async tasks.

pub mod executor;
pub mod shutdown;

pub use executor::run_blocking;
pub use shutdown::{ShutdownListener, ShutdownSignal};

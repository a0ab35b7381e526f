//! Worker-side logic
//!
//! Registration with the coordinator, the job session protocol and the
//! worker server tying them to the job state store.

pub mod client;
pub mod server;
pub mod session;
pub mod state;

pub use client::{Registration, RegistrationEnd};
pub use server::{WorkerConfig, WorkerServer};
pub use session::{serve_job_connection, JobContext};
pub use state::{WorkerPhase, WorkerState};

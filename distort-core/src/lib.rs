//! Distort Core - distributed file distortion dispatch
//!
//! This crate provides:
//! - The fixed-size wire frame codec in text and binary profiles
//! - The coordinator: worker registry, listeners and dispatch engine
//! - Workers running resumable distortion jobs
//! - The crash-recoverable job state table shared between worker processes
//! - Clients submitting a directory of files through the coordinator

pub mod checkpoint;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod data;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod runtime;
pub mod storage;
pub mod worker;

pub use error::{DistortError, Result};

/// Default frame queue slots per job connection
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default job state table slots
pub const DEFAULT_STORE_CAPACITY: usize = 128;

/// Default worker registry capacity
pub const DEFAULT_MAX_WORKERS: usize = 64;

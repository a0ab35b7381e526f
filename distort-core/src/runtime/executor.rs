//! Blocking work offload
//!
//! File locks and external tool invocations block the calling thread, so
//! async code hands them to tokio's blocking pool.

use crate::error::{DistortError, Result};

/// Run a blocking closure on the blocking pool and flatten the join error
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DistortError::Internal {
            message: format!("blocking task failed: {}", e),
        })?
}

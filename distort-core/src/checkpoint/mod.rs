//! Job state persistence
//!
//! Fixed-layout job progress table in a lock-guarded file that outlives any
//! single worker process.

pub mod segment;
pub mod store;
pub mod table;

pub use segment::{SegmentGuard, SharedSegment};
pub use store::JobStateStore;
pub use table::{DistortionJobEntry, JobKey, JobStateTable, JobStatus, UpsertOutcome};

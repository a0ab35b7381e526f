//! Frame ingestion pipeline
//!
//! Bounded queue and socket pump decoupling frame reads from processing.

pub mod pump;
pub mod queue;

pub use pump::{pump_frames, PumpStats};
pub use queue::{BoundedFrameQueue, QueueFull};

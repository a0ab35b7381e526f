//! Wire protocol shared by coordinator, workers and clients
//!
//! Fixed-size frames with a payload checksum, two wire profiles, payload
//! grammars and a stream transport.

pub mod codec;
pub mod frame;
pub mod payload;
pub mod transport;

pub use codec::{WireProfile, JOB_PROFILE};
pub use frame::{checksum, FrameType, WireFrame};
pub use payload::{
    DistortRequest, JobMetadata, JobRequest, RegisterRequest, WorkerClass, WorkerEndpoint,
};
pub use transport::{read_frame, write_frame, FrameReader, FrameTransport, FrameWriter};

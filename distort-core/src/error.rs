//! Error types for distort
//!
//! Error taxonomy covering framing, transport, routing, job state,
//! collaborator and configuration failures.

use thiserror::Error;

/// Primary error type for all distort operations
#[derive(Debug, Error)]
pub enum DistortError {
    // ========== Protocol Errors ==========

    /// Frame could not be parsed (missing fields, bad numbers, wrong size)
    #[error("Malformed frame: {reason}")]
    MalformedFrame { reason: String },

    /// Declared or actual payload length exceeds the profile maximum
    #[error("Payload of {length} bytes exceeds maximum {max}")]
    PayloadTooLarge { length: usize, max: usize },

    /// Recomputed checksum differs from the one carried by the frame
    #[error("Checksum invalid: frame carries {expected:#06x}, payload sums to {actual:#06x}")]
    ChecksumInvalid { expected: u16, actual: u16 },

    /// Payload does not follow the grammar expected for its frame type
    #[error("Invalid payload: {reason}")]
    InvalidPayload { reason: String },

    /// Frame type was not expected at this point of the conversation
    #[error("Unexpected frame type {code:#04x}")]
    UnexpectedFrame { code: u8 },

    // ========== Transport Errors ==========

    /// Underlying socket or file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the connection part way through a frame
    #[error("Connection closed after {received} of {expected} frame bytes")]
    UnexpectedEof { received: usize, expected: usize },

    /// Outbound connection could not be established or was dropped
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// Bounded frame queue rejected a frame
    #[error("Frame queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    // ========== Routing Errors ==========

    /// No primary worker registered for the requested class
    #[error("No {class} worker available")]
    RegistryMiss { class: String },

    /// Media type or file extension does not map to a worker class
    #[error("Invalid media type: {media_type}")]
    InvalidMediaType { media_type: String },

    /// Registry reached its worker limit
    #[error("Worker registry full ({capacity} workers)")]
    RegistryFull { capacity: usize },

    /// No worker registered on the given connection
    #[error("Connection {connection} has no registered worker")]
    WorkerNotRegistered { connection: u64 },

    // ========== Job State Errors ==========

    /// Job state table has no free slot
    #[error("Job state table full ({capacity} entries)")]
    StoreFull { capacity: usize },

    /// Job state backing file is unreadable or inconsistent
    #[error("Job state store corrupt: {reason}")]
    StoreCorrupt { reason: String },

    // ========== Collaborator Errors ==========

    /// External digest tool failed
    #[error("Digest of {path} failed")]
    DigestFailed { path: String },

    /// Received file content does not match the announced digest
    #[error("MD5 mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch { file: String, expected: String, actual: String },

    /// Distortion transform reported failure
    #[error("Distortion failed: {reason}")]
    DistortionFailed { reason: String },

    // ========== Configuration Errors ==========

    /// Startup configuration missing or invalid
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    // ========== Runtime Errors ==========

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DistortError {
    /// Returns true if a frame was read but could not be decoded.
    ///
    /// The frame boundary is still intact, so the connection can answer with
    /// an error frame and keep reading.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            DistortError::MalformedFrame { .. } | DistortError::PayloadTooLarge { .. }
        )
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        DistortError::Config { reason: reason.into() }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        DistortError::MalformedFrame { reason: reason.into() }
    }

    pub(crate) fn invalid_payload(reason: impl Into<String>) -> Self {
        DistortError::InvalidPayload { reason: reason.into() }
    }
}

/// Result type alias for distort operations
pub type Result<T> = std::result::Result<T, DistortError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let eof = DistortError::UnexpectedEof { received: 10, expected: 256 };
        assert!(!eof.is_decode());

        assert!(DistortError::malformed("four fields").is_decode());
        assert!(DistortError::PayloadTooLarge { length: 300, max: 247 }.is_decode());

        let checksum = DistortError::ChecksumInvalid { expected: 1, actual: 2 };
        assert!(!checksum.is_decode());
    }
}

//! Protocol frame and checksum
//!
//! A frame is the single unit every process exchanges: a type tag, a
//! bounded payload, a checksum over the payload and a send timestamp.

use bytes::Bytes;
use std::fmt;

use crate::error::{DistortError, Result};

/// Reply payload for a successful `Connect`
pub const CONNECTED: &str = "CONNECTED";
/// Reply payload for a rejected `Register`
pub const REGISTER_FAILED: &str = "REGISTER_FAILED";
/// Reply payload when no primary worker serves the requested class
pub const NO_WORKER_AVAILABLE: &str = "NO_WORKER_AVAILABLE";
/// Reply payload when the media type or extension maps to no worker class
pub const INVALID_MEDIA_TYPE: &str = "INVALID_MEDIA_TYPE";
/// Reply payload for `CheckStatus`
pub const STATUS_OK: &str = "STATUS_OK";
/// Payload of the `Unrecognized` reply
pub const COMMAND_NOT_RECOGNIZED: &str = "COMMAND_NOT_RECOGNIZED";
/// Validation verdict: output digest matched
pub const VALID: &str = "VALID";
/// Validation verdict: digest mismatch or transfer failure
pub const INVALID: &str = "INVALID";

/// Reserved frame type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Client handshake
    Connect = 0x01,
    /// Worker joins the pool
    Register = 0x02,
    /// Job request sent to a worker; replies carry the committed byte offset
    JobRequest = 0x03,
    /// Output size and digest
    JobMetadata = 0x04,
    /// Chunk of file content
    JobData = 0x05,
    /// Validation verdict for a finished job
    JobValidation = 0x06,
    /// Peer is going away
    Disconnect = 0x07,
    /// Job dispatch request to the coordinator
    Distort = 0x08,
    /// Protocol error (checksum, decode, backpressure); empty payload
    Error = 0x09,
    /// Status check
    CheckStatus = 0x0A,
    /// Command not recognized
    Unrecognized = 0xFF,
}

impl FrameType {
    /// Map a wire code to a known frame type
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => FrameType::Connect,
            0x02 => FrameType::Register,
            0x03 => FrameType::JobRequest,
            0x04 => FrameType::JobMetadata,
            0x05 => FrameType::JobData,
            0x06 => FrameType::JobValidation,
            0x07 => FrameType::Disconnect,
            0x08 => FrameType::Distort,
            0x09 => FrameType::Error,
            0x0A => FrameType::CheckStatus,
            0xFF => FrameType::Unrecognized,
            _ => return None,
        })
    }

    /// Wire code
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Sum of payload bytes modulo 65536.
///
/// Covers the payload only; type, length and timestamp are not included.
pub fn checksum(payload: &[u8]) -> u16 {
    payload
        .iter()
        .fold(0u16, |acc, &byte| acc.wrapping_add(u16::from(byte)))
}

/// Current time as seconds since the epoch, truncated to the wire width
pub fn now_timestamp() -> u32 {
    chrono::Utc::now().timestamp().clamp(0, i64::from(u32::MAX)) as u32
}

/// One protocol message
#[derive(Clone, PartialEq, Eq)]
pub struct WireFrame {
    /// Raw type code; may be outside [`FrameType`] for frames from peers
    pub code: u8,
    /// Payload bytes (not necessarily text)
    pub payload: Bytes,
    /// Checksum as carried on the wire
    pub checksum: u16,
    /// Send time, seconds since the epoch
    pub timestamp: u32,
}

impl WireFrame {
    /// Build a frame stamped with the current time and a fresh checksum
    pub fn new(frame_type: FrameType, payload: impl Into<Bytes>) -> Self {
        Self::with_code(frame_type.code(), payload)
    }

    /// Build a frame from a raw type code
    pub fn with_code(code: u8, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            code,
            checksum: checksum(&payload),
            timestamp: now_timestamp(),
            payload,
        }
    }

    /// Frame without payload
    pub fn empty(frame_type: FrameType) -> Self {
        Self::new(frame_type, Bytes::new())
    }

    /// Reserved-type error frame with zero-length payload
    pub fn error() -> Self {
        Self::empty(FrameType::Error)
    }

    /// "Command not recognized" reply
    pub fn unrecognized() -> Self {
        Self::new(FrameType::Unrecognized, COMMAND_NOT_RECOGNIZED)
    }

    /// Known frame type, if any
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_code(self.code)
    }

    /// True if this frame has the given type
    pub fn is(&self, frame_type: FrameType) -> bool {
        self.code == frame_type.code()
    }

    /// Payload byte count
    pub fn data_length(&self) -> usize {
        self.payload.len()
    }

    /// Payload as UTF-8 text, if it is text
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// True if the payload equals the given literal marker
    pub fn carries(&self, marker: &str) -> bool {
        self.payload.as_ref() == marker.as_bytes()
    }

    /// Recompute the payload checksum and compare it with the carried one
    pub fn verify(&self) -> Result<()> {
        let actual = checksum(&self.payload);
        if actual != self.checksum {
            return Err(DistortError::ChecksumInvalid {
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for WireFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireFrame")
            .field("code", &format_args!("{:#04x}", self.code))
            .field("data_length", &self.payload.len())
            .field("checksum", &format_args!("{:#06x}", self.checksum))
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(b""), 0);
        assert_eq!(checksum(b"abc"), 97 + 98 + 99);

        let big = vec![0xFFu8; 300];
        assert_eq!(checksum(&big), ((0xFFu32 * 300) % 65536) as u16);
    }

    #[test]
    fn test_single_byte_corruption_detected() {
        let payload = b"userA&notes.txt&1024&d41d8cd98f00b204e9800998ecf8427e&3".to_vec();
        let frame = WireFrame::new(FrameType::JobRequest, payload.clone());
        frame.verify().unwrap();

        for i in 0..payload.len() {
            let mut corrupted = payload.clone();
            corrupted[i] ^= 0x01;
            let tampered = WireFrame {
                payload: Bytes::from(corrupted),
                ..frame.clone()
            };
            assert!(matches!(
                tampered.verify(),
                Err(DistortError::ChecksumInvalid { .. })
            ));
        }
    }

    #[test]
    fn test_frame_type_codes() {
        for code in 0u8..=255 {
            if let Some(ty) = FrameType::from_code(code) {
                assert_eq!(ty.code(), code);
            }
        }
        assert_eq!(FrameType::from_code(0x42), None);
        assert!(WireFrame::error().payload.is_empty());
        assert!(WireFrame::unrecognized().carries(COMMAND_NOT_RECOGNIZED));
    }
}

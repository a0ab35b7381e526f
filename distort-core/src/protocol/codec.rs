//! Wire encodings for [`WireFrame`]
//!
//! Two profiles share the same logical fields and always produce a buffer of
//! exactly [`WireProfile::frame_size`] bytes:
//!
//! - `Text`: `<type-hex>|<length-hex>|<timestamp-dec>|<checksum-hex>|<payload>`
//!   padded with NUL bytes. The payload must not contain `|` or NUL.
//! - `Binary`: `[type:1][length:2][payload:247][checksum:2][timestamp:4]`,
//!   big-endian, payload zero-padded.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::frame::WireFrame;
use crate::error::{DistortError, Result};

/// Field separator of the text profile
pub const TEXT_SEPARATOR: u8 = b'|';

/// Total size of a text-profile frame
pub const TEXT_FRAME_SIZE: usize = 264;
/// Maximum payload of a text-profile frame
pub const TEXT_MAX_PAYLOAD: usize = 240;

/// Total size of a binary-profile frame
pub const BINARY_FRAME_SIZE: usize = 256;
/// Maximum payload of a binary-profile frame
pub const BINARY_MAX_PAYLOAD: usize = BINARY_FRAME_SIZE - 1 - 2 - 2 - 4;

/// Wire encoding selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireProfile {
    /// Delimited text fields
    Text,
    /// Fixed byte offsets
    #[default]
    Binary,
}

/// Profile of every connection to a worker's job listener. Job data carries
/// raw file bytes, which the text profile cannot frame.
pub const JOB_PROFILE: WireProfile = WireProfile::Binary;

impl WireProfile {
    /// Exact number of bytes of one encoded frame
    pub const fn frame_size(self) -> usize {
        match self {
            WireProfile::Text => TEXT_FRAME_SIZE,
            WireProfile::Binary => BINARY_FRAME_SIZE,
        }
    }

    /// Largest payload a frame may carry
    pub const fn max_payload(self) -> usize {
        match self {
            WireProfile::Text => TEXT_MAX_PAYLOAD,
            WireProfile::Binary => BINARY_MAX_PAYLOAD,
        }
    }

    /// Encode a frame into a fixed-size buffer
    pub fn encode(self, frame: &WireFrame) -> Result<Bytes> {
        let length = frame.payload.len();
        if length > self.max_payload() {
            return Err(DistortError::PayloadTooLarge {
                length,
                max: self.max_payload(),
            });
        }

        match self {
            WireProfile::Text => encode_text(frame),
            WireProfile::Binary => Ok(encode_binary(frame)),
        }
    }

    /// Decode a fixed-size buffer into a frame.
    ///
    /// The carried checksum is returned as-is; callers verify it with
    /// [`WireFrame::verify`].
    pub fn decode(self, buf: &[u8]) -> Result<WireFrame> {
        if buf.len() != self.frame_size() {
            return Err(DistortError::malformed(format!(
                "expected {} bytes, got {}",
                self.frame_size(),
                buf.len()
            )));
        }

        match self {
            WireProfile::Text => decode_text(buf),
            WireProfile::Binary => decode_binary(buf),
        }
    }
}

fn encode_text(frame: &WireFrame) -> Result<Bytes> {
    if let Some(pos) = frame
        .payload
        .iter()
        .position(|&b| b == TEXT_SEPARATOR || b == 0)
    {
        return Err(DistortError::invalid_payload(format!(
            "byte {:#04x} at offset {} not allowed in text frame",
            frame.payload[pos], pos
        )));
    }

    let header = format!(
        "{:x}|{:x}|{}|{:x}|",
        frame.code,
        frame.payload.len(),
        frame.timestamp,
        frame.checksum
    );

    let mut buf = BytesMut::with_capacity(TEXT_FRAME_SIZE);
    buf.put_slice(header.as_bytes());
    buf.put_slice(&frame.payload);
    // header is at most 22 bytes, so one NUL terminator always fits
    buf.put_bytes(0, TEXT_FRAME_SIZE - buf.len());
    Ok(buf.freeze())
}

fn decode_text(buf: &[u8]) -> Result<WireFrame> {
    let mut fields = buf.splitn(5, |&b| b == TEXT_SEPARATOR);
    let (Some(code), Some(length), Some(timestamp), Some(checksum), Some(rest)) = (
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
    ) else {
        return Err(DistortError::malformed("fewer than five fields"));
    };

    let code = parse_field(code, 16, "type")? as u8;
    let length = parse_field(length, 16, "length")? as usize;
    let timestamp = parse_field(timestamp, 10, "timestamp")? as u32;
    let checksum = parse_field(checksum, 16, "checksum")? as u16;

    if length > TEXT_MAX_PAYLOAD {
        return Err(DistortError::PayloadTooLarge {
            length,
            max: TEXT_MAX_PAYLOAD,
        });
    }
    if rest.len() < length {
        return Err(DistortError::malformed(format!(
            "declared length {} but only {} payload bytes",
            length,
            rest.len()
        )));
    }

    let payload = &rest[..length];
    if payload.iter().any(|&b| b == 0 || b == TEXT_SEPARATOR) {
        return Err(DistortError::malformed(
            "payload contains NUL or separator before declared length",
        ));
    }

    Ok(WireFrame {
        code,
        payload: Bytes::copy_from_slice(payload),
        checksum,
        timestamp,
    })
}

fn parse_field(raw: &[u8], radix: u32, name: &str) -> Result<u32> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| DistortError::malformed(format!("{} field is not ASCII", name)))?;
    let value = u32::from_str_radix(text, radix)
        .map_err(|_| DistortError::malformed(format!("{} field {:?} is not a number", name, text)))?;

    let limit = match name {
        "type" => u32::from(u8::MAX),
        "checksum" => u32::from(u16::MAX),
        _ => u32::MAX,
    };
    if value > limit {
        return Err(DistortError::malformed(format!("{} field {} out of range", name, value)));
    }
    Ok(value)
}

fn encode_binary(frame: &WireFrame) -> Bytes {
    let mut buf = BytesMut::with_capacity(BINARY_FRAME_SIZE);
    buf.put_u8(frame.code);
    buf.put_u16(frame.payload.len() as u16);
    buf.put_slice(&frame.payload);
    buf.put_bytes(0, BINARY_MAX_PAYLOAD - frame.payload.len());
    buf.put_u16(frame.checksum);
    buf.put_u32(frame.timestamp);
    buf.freeze()
}

fn decode_binary(mut buf: &[u8]) -> Result<WireFrame> {
    let code = buf.get_u8();
    let length = buf.get_u16() as usize;
    if length > BINARY_MAX_PAYLOAD {
        return Err(DistortError::PayloadTooLarge {
            length,
            max: BINARY_MAX_PAYLOAD,
        });
    }

    let payload = Bytes::copy_from_slice(&buf[..length]);
    buf.advance(BINARY_MAX_PAYLOAD);
    let checksum = buf.get_u16();
    let timestamp = buf.get_u32();

    Ok(WireFrame {
        code,
        payload,
        checksum,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::FrameType;

    fn sample(payload: &[u8]) -> WireFrame {
        WireFrame {
            code: FrameType::Distort.code(),
            payload: Bytes::copy_from_slice(payload),
            checksum: crate::protocol::frame::checksum(payload),
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn test_binary_roundtrip_at_limits() {
        for len in [0, 1, BINARY_MAX_PAYLOAD] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
            let frame = sample(&payload);
            let encoded = WireProfile::Binary.encode(&frame).unwrap();
            assert_eq!(encoded.len(), BINARY_FRAME_SIZE);
            assert_eq!(WireProfile::Binary.decode(&encoded).unwrap(), frame);
        }
    }

    #[test]
    fn test_job_profile_carries_any_byte() {
        let payload = b"name|age\nbob|42\n\0\xff".to_vec();
        let frame = sample(&payload);
        assert!(WireProfile::Text.encode(&frame).is_err());
        let encoded = JOB_PROFILE.encode(&frame).unwrap();
        assert_eq!(JOB_PROFILE.decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_binary_layout() {
        let frame = sample(b"ab");
        let encoded = WireProfile::Binary.encode(&frame).unwrap();
        assert_eq!(encoded[0], 0x08);
        assert_eq!(&encoded[1..3], &[0x00, 0x02]);
        assert_eq!(&encoded[3..5], b"ab");
        assert_eq!(&encoded[250..252], &(97u16 + 98).to_be_bytes());
        assert_eq!(&encoded[252..256], &1_700_000_000u32.to_be_bytes());
    }

    #[test]
    fn test_binary_rejects_oversized_length() {
        let mut raw = WireProfile::Binary.encode(&sample(b"x")).unwrap().to_vec();
        raw[1..3].copy_from_slice(&300u16.to_be_bytes());
        assert!(matches!(
            WireProfile::Binary.decode(&raw),
            Err(DistortError::PayloadTooLarge { length: 300, .. })
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let frame = sample(&vec![b'a'; TEXT_MAX_PAYLOAD + 1]);
        assert!(matches!(
            WireProfile::Text.encode(&frame),
            Err(DistortError::PayloadTooLarge { .. })
        ));
        let frame = sample(&vec![b'a'; BINARY_MAX_PAYLOAD + 1]);
        assert!(WireProfile::Binary.encode(&frame).is_err());
    }

    #[test]
    fn test_text_roundtrip() {
        let frame = sample(b"media&photo.jpg");
        let encoded = WireProfile::Text.encode(&frame).unwrap();
        assert_eq!(encoded.len(), TEXT_FRAME_SIZE);
        assert!(encoded.starts_with(b"8|f|1700000000|"));
        assert_eq!(WireProfile::Text.decode(&encoded).unwrap(), frame);

        let full = sample(&vec![b'z'; TEXT_MAX_PAYLOAD]);
        let encoded = WireProfile::Text.encode(&full).unwrap();
        assert_eq!(WireProfile::Text.decode(&encoded).unwrap(), full);
    }

    #[test]
    fn test_text_rejects_separator_in_payload() {
        assert!(matches!(
            WireProfile::Text.encode(&sample(b"a|b")),
            Err(DistortError::InvalidPayload { .. })
        ));
        assert!(WireProfile::Text.encode(&sample(b"a\0b")).is_err());
    }

    #[test]
    fn test_text_missing_fields() {
        let mut raw = vec![0u8; TEXT_FRAME_SIZE];
        raw[..8].copy_from_slice(b"1|0|5|0\0");
        assert!(matches!(
            WireProfile::Text.decode(&raw),
            Err(DistortError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_text_declared_length_too_large() {
        let mut raw = vec![0u8; TEXT_FRAME_SIZE];
        let header = b"8|ff|0|0|";
        raw[..header.len()].copy_from_slice(header);
        assert!(matches!(
            WireProfile::Text.decode(&raw),
            Err(DistortError::PayloadTooLarge { length: 255, .. })
        ));
    }

    #[test]
    fn test_text_embedded_nul() {
        let mut raw = vec![0u8; TEXT_FRAME_SIZE];
        let header = b"8|4|0|0|ab";
        raw[..header.len()].copy_from_slice(header);
        assert!(WireProfile::Text.decode(&raw).is_err());
    }

    #[test]
    fn test_wrong_buffer_size() {
        assert!(WireProfile::Binary.decode(&[0u8; 10]).is_err());
        assert!(WireProfile::Text.decode(&[0u8; BINARY_FRAME_SIZE]).is_err());
    }
}

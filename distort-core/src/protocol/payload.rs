//! Payload grammars
//!
//! Payloads are ASCII fields joined by `&`. There is no escaping, so a field
//! must never contain `&` itself.

use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

use crate::error::{DistortError, Result};

/// Separator between payload fields
pub const FIELD_SEPARATOR: char = '&';

/// Worker class a job is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerClass {
    /// Plain text files
    Text,
    /// Audio and image files
    Media,
}

impl WorkerClass {
    /// All classes, in routing-table order
    pub const ALL: [WorkerClass; 2] = [WorkerClass::Text, WorkerClass::Media];

    /// Map a file name to the class that handles it by extension
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "txt" => Some(WorkerClass::Text),
            "wav" | "jpg" | "png" => Some(WorkerClass::Media),
            _ => None,
        }
    }

    /// Extensions served by this class
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            WorkerClass::Text => &["txt"],
            WorkerClass::Media => &["wav", "jpg", "png"],
        }
    }

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerClass::Text => "TEXT",
            WorkerClass::Media => "MEDIA",
        }
    }
}

impl fmt::Display for WorkerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerClass {
    type Err = DistortError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("text") {
            Ok(WorkerClass::Text)
        } else if s.eq_ignore_ascii_case("media") {
            Ok(WorkerClass::Media)
        } else {
            Err(DistortError::InvalidMediaType {
                media_type: s.to_string(),
            })
        }
    }
}

/// Split a payload into exactly `count` fields
fn split_fields(payload: &[u8], count: usize) -> Result<Vec<&str>> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| DistortError::invalid_payload("payload is not ASCII"))?;
    let fields: Vec<&str> = text.split(FIELD_SEPARATOR).collect();
    if fields.len() != count {
        return Err(DistortError::invalid_payload(format!(
            "expected {} fields, got {} in {:?}",
            count,
            fields.len(),
            text
        )));
    }
    Ok(fields)
}

/// Join fields with `&`, refusing fields that contain the separator
fn join_fields(fields: &[&str]) -> Result<Bytes> {
    if let Some(bad) = fields.iter().find(|f| f.contains(FIELD_SEPARATOR)) {
        return Err(DistortError::invalid_payload(format!(
            "field {:?} contains '{}'",
            bad, FIELD_SEPARATOR
        )));
    }
    let joined = fields.join(&FIELD_SEPARATOR.to_string());
    Ok(Bytes::from(joined))
}

fn parse_number<T: FromStr>(field: &str, name: &str) -> Result<T> {
    field
        .parse()
        .map_err(|_| DistortError::invalid_payload(format!("{} {:?} is not a number", name, field)))
}

fn non_empty<'a>(field: &'a str, name: &str) -> Result<&'a str> {
    if field.is_empty() {
        return Err(DistortError::invalid_payload(format!("{} is empty", name)));
    }
    Ok(field)
}

/// `type&ip&port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub class: WorkerClass,
    pub ip: String,
    pub port: u16,
}

impl RegisterRequest {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let fields = split_fields(payload, 3)?;
        Ok(Self {
            class: fields[0].parse()?,
            ip: non_empty(fields[1], "ip")?.to_string(),
            port: parse_number(fields[2], "port")?,
        })
    }

    pub fn to_payload(&self) -> Result<Bytes> {
        join_fields(&[self.class.as_str(), &self.ip, &self.port.to_string()])
    }
}

/// `mediaType&fileName`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistortRequest {
    pub media_type: String,
    pub file_name: String,
}

impl DistortRequest {
    pub fn new(media_type: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            file_name: file_name.into(),
        }
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        let fields = split_fields(payload, 2)?;
        Ok(Self::new(fields[0], non_empty(fields[1], "file name")?))
    }

    pub fn to_payload(&self) -> Result<Bytes> {
        join_fields(&[&self.media_type, &self.file_name])
    }
}

/// `ip&port`, a worker's job endpoint as returned for a forwarded `Distort`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEndpoint {
    pub ip: String,
    pub port: u16,
}

impl WorkerEndpoint {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let fields = split_fields(payload, 2)?;
        Ok(Self {
            ip: non_empty(fields[0], "ip")?.to_string(),
            port: parse_number(fields[1], "port")?,
        })
    }

    pub fn to_payload(&self) -> Result<Bytes> {
        join_fields(&[&self.ip, &self.port.to_string()])
    }

    /// `ip:port` form for socket connection
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// `userName&fileName&fileSize&md5&factor`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub user_name: String,
    pub file_name: String,
    pub file_size: u64,
    pub md5: String,
    pub factor: u32,
}

impl JobRequest {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let fields = split_fields(payload, 5)?;
        let md5 = fields[3];
        if !is_md5_hex(md5) {
            return Err(DistortError::invalid_payload(format!("md5 {:?} is not 32 hex chars", md5)));
        }
        let factor: u32 = parse_number(fields[4], "factor")?;
        if factor == 0 {
            return Err(DistortError::invalid_payload("factor must be at least 1"));
        }
        Ok(Self {
            user_name: non_empty(fields[0], "user name")?.to_string(),
            file_name: non_empty(fields[1], "file name")?.to_string(),
            file_size: parse_number(fields[2], "file size")?,
            md5: md5.to_ascii_lowercase(),
            factor,
        })
    }

    pub fn to_payload(&self) -> Result<Bytes> {
        join_fields(&[
            &self.user_name,
            &self.file_name,
            &self.file_size.to_string(),
            &self.md5,
            &self.factor.to_string(),
        ])
    }
}

/// `fileSize&md5`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobMetadata {
    pub file_size: u64,
    pub md5: String,
}

impl JobMetadata {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let fields = split_fields(payload, 2)?;
        if !is_md5_hex(fields[1]) {
            return Err(DistortError::invalid_payload(format!(
                "md5 {:?} is not 32 hex chars",
                fields[1]
            )));
        }
        Ok(Self {
            file_size: parse_number(fields[0], "file size")?,
            md5: fields[1].to_ascii_lowercase(),
        })
    }

    pub fn to_payload(&self) -> Result<Bytes> {
        join_fields(&[&self.file_size.to_string(), &self.md5])
    }
}

/// Decimal byte offset carried by `JobRequest` replies
pub fn parse_offset(payload: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| DistortError::invalid_payload("offset is not ASCII"))?;
    parse_number(text, "offset")
}

/// True if `s` is a 32 character hex digest
pub fn is_md5_hex(s: &str) -> bool {
    s.len() == 32 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

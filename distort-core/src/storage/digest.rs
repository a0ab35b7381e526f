//! File digest collaborator

use std::path::Path;
use std::process::Command;
use tracing::warn;

use crate::error::{DistortError, Result};
use crate::protocol::payload::is_md5_hex;

/// Marker returned by a digest tool that could not hash the file
pub const DIGEST_ERROR: &str = "ERROR";

/// Computes the MD5 digest of a file
pub trait Digest: Send + Sync {
    /// 32 lowercase hex chars, or [`DIGEST_ERROR`]
    fn digest(&self, path: &Path) -> String;
}

/// Digest through the `md5sum` utility
#[derive(Debug, Clone, Default)]
pub struct Md5sumDigest;

impl Digest for Md5sumDigest {
    fn digest(&self, path: &Path) -> String {
        let output = match Command::new("md5sum").arg(path).output() {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                warn!("md5sum {:?} exited with {}", path, output.status);
                return DIGEST_ERROR.to_string();
            }
            Err(e) => {
                warn!("md5sum {:?} could not run: {}", path, e);
                return DIGEST_ERROR.to_string();
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.split_whitespace().next() {
            Some(hex) if is_md5_hex(hex) => hex.to_ascii_lowercase(),
            _ => DIGEST_ERROR.to_string(),
        }
    }
}

/// Digest `path` and turn the error marker into an error
pub fn digest_file(digest: &dyn Digest, path: &Path) -> Result<String> {
    let hex = digest.digest(path);
    if hex == DIGEST_ERROR {
        return Err(DistortError::DigestFailed {
            path: path.display().to_string(),
        });
    }
    Ok(hex)
}

/// Digest `path` and compare against `expected`
pub fn verify_file(digest: &dyn Digest, path: &Path, expected: &str) -> Result<()> {
    let actual = digest_file(digest, path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(DistortError::ChecksumMismatch {
            file: path.display().to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5sum_of_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, b"").unwrap();

        assert_eq!(
            Md5sumDigest.digest(&path),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        verify_file(&Md5sumDigest, &path, "D41D8CD98F00B204E9800998ECF8427E").unwrap();
    }

    #[test]
    fn test_missing_file_reports_error_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");

        assert_eq!(Md5sumDigest.digest(&path), DIGEST_ERROR);
        assert!(matches!(
            digest_file(&Md5sumDigest, &path),
            Err(DistortError::DigestFailed { .. })
        ));
    }
}

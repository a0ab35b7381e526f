//! Distortion collaborator
//!
//! The transform itself is opaque to the job protocol: it turns one file
//! into another and reports success or failure.

use std::path::Path;
use tracing::debug;

use crate::error::{DistortError, Result};

/// Transforms an input file into an output file
pub trait Distorter: Send + Sync {
    /// Write the distorted form of `input` to `output` and return its size
    fn distort(&self, input: &Path, output: &Path, factor: u32) -> Result<u64>;
}

/// Keeps every `factor`-th byte of the input
#[derive(Debug, Clone, Default)]
pub struct StrideDistorter;

impl Distorter for StrideDistorter {
    fn distort(&self, input: &Path, output: &Path, factor: u32) -> Result<u64> {
        if factor == 0 {
            return Err(DistortError::DistortionFailed {
                reason: "factor must be at least 1".into(),
            });
        }

        let data = std::fs::read(input).map_err(|e| DistortError::DistortionFailed {
            reason: format!("cannot read {:?}: {}", input, e),
        })?;
        let distorted: Vec<u8> = data.iter().step_by(factor as usize).copied().collect();
        std::fs::write(output, &distorted)?;

        debug!(
            "Distorted {:?}: {} -> {} bytes (factor {})",
            input,
            data.len(),
            distorted.len(),
            factor
        );
        Ok(distorted.len() as u64)
    }
}

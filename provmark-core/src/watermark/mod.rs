//! Watermark embedding and detection capabilities.
//!
//! The embedding model itself is an external collaborator. This module
//! defines the contract the pipeline relies on and ships two
//! implementations:
//!
//! - [`LsbWatermarker`] - keyed least-significant-bit reference embedder,
//!   in process, used for development and tests
//! - [`HttpWatermarkService`] - client for a GPU-backed service (feature
//!   `network`)

#[cfg(feature = "network")]
mod http;
mod lsb;

use std::ops::Range;

use async_trait::async_trait;
use thiserror::Error;

use crate::payload::{Detection, WatermarkPayload};

#[cfg(feature = "network")]
pub use http::{HttpWatermarkConfig, HttpWatermarkService};
pub use lsb::LsbWatermarker;

#[derive(Debug, Clone, Error)]
pub enum WatermarkError {
    #[error("Watermark call timed out")]
    Timeout,

    #[error("Transient watermark failure: {0}")]
    Transient(String),

    #[error("Watermark failure: {0}")]
    Permanent(String),

    #[error("Embedder violated the chunk contract: {0}")]
    ContractViolation(String),
}

impl WatermarkError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transient(_))
    }
}

/// One embedding call: a chunk plus the payload to hide in it.
#[derive(Debug, Clone, Copy)]
pub struct EmbedRequest<'a> {
    pub chunk_index: usize,
    pub data: &'a [u8],
    /// Ranges of `data` the embedder may modify.
    pub essence: &'a [Range<usize>],
    pub payload: &'a WatermarkPayload,
}

/// Hides a payload inside chunk bytes.
///
/// Implementations must return bytes of the same length as the input and
/// must leave every byte outside `essence` untouched.
#[async_trait]
pub trait WatermarkEmbedder: Send + Sync {
    fn name(&self) -> &'static str;

    async fn embed(&self, request: EmbedRequest<'_>) -> Result<Vec<u8>, WatermarkError>;
}

/// Recovers a payload from (possibly watermarked) bytes.
#[async_trait]
pub trait WatermarkDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decode a payload. No watermark is a low-confidence detection, not an error.
    async fn detect(
        &self,
        data: &[u8],
        essence: &[Range<usize>],
    ) -> Result<Detection, WatermarkError>;
}

/// Check that `embedded` only differs from `original` inside `essence`.
pub fn verify_embedding(
    original: &[u8],
    embedded: &[u8],
    essence: &[Range<usize>],
) -> Result<(), WatermarkError> {
    if original.len() != embedded.len() {
        return Err(WatermarkError::ContractViolation(format!(
            "length changed from {} to {}",
            original.len(),
            embedded.len()
        )));
    }
    let mut cursor = 0;
    let mut sorted: Vec<&Range<usize>> = essence.iter().collect();
    sorted.sort_by_key(|r| r.start);
    for range in sorted {
        let start = range.start.max(cursor).min(original.len());
        if original[cursor..start] != embedded[cursor..start] {
            return Err(WatermarkError::ContractViolation(format!(
                "bytes before offset {start} were modified"
            )));
        }
        cursor = cursor.max(range.end.min(original.len()));
    }
    if original[cursor..] != embedded[cursor..] {
        return Err(WatermarkError::ContractViolation(
            "container framing was modified".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(WatermarkError::Timeout.is_transient());
        assert!(WatermarkError::Transient("busy".into()).is_transient());
        assert!(!WatermarkError::Permanent("bad input".into()).is_transient());
        assert!(!WatermarkError::ContractViolation("len".into()).is_transient());
    }

    #[test]
    fn test_verify_embedding_accepts_essence_changes() {
        let original = vec![0u8; 32];
        let mut embedded = original.clone();
        embedded[5] = 1;
        embedded[20] = 1;
        verify_embedding(&original, &embedded, &[16..24, 4..8]).unwrap();
    }

    #[test]
    fn test_verify_embedding_rejects_framing_changes() {
        let original = vec![0u8; 32];
        let mut embedded = original.clone();
        embedded[10] = 1;
        assert!(verify_embedding(&original, &embedded, &[4..8, 16..24]).is_err());

        let mut tail = original.clone();
        tail[31] = 1;
        assert!(verify_embedding(&original, &tail, &[4..8]).is_err());
    }

    #[test]
    fn test_verify_embedding_rejects_length_change() {
        let err = verify_embedding(&[0; 8], &[0; 9], &[0..8]).unwrap_err();
        assert!(matches!(err, WatermarkError::ContractViolation(_)));
    }
}

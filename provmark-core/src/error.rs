use thiserror::Error;

use crate::session::{SessionId, SessionStatus};

#[derive(Error, Debug)]
pub enum ProvmarkError {
    #[error("Invalid asset: {0}")]
    InvalidAsset(String),

    #[error("Embedding failed for chunk {chunk} after {attempts} attempt(s): {reason}")]
    EmbeddingFailed {
        chunk: usize,
        attempts: u32,
        reason: String,
    },

    #[error("Reassembly failed: {0}")]
    ReassemblyFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Result not ready: session is {status}")]
    NotReady { status: SessionStatus },

    #[error("Artifact for session {0} is gone")]
    Gone(SessionId),

    #[error("Decode unavailable: {0}")]
    DecodeUnavailable(String),

    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Artifact storage error: {0}")]
    Storage(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProvmarkError {
    /// Stable machine-readable code, recorded on failed sessions.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAsset(_) => "INVALID_ASSET",
            Self::EmbeddingFailed { .. } => "EMBEDDING_FAILED",
            Self::ReassemblyFailed(_) => "REASSEMBLY_FAILED",
            Self::SigningFailed(_) => "SIGNING_FAILED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::NotReady { .. } => "NOT_READY",
            Self::Gone(_) => "GONE",
            Self::DecodeUnavailable(_) => "DECODE_UNAVAILABLE",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Catalog(_) => "CATALOG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this error is caused by how the client queried a session.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::NotReady { .. } | Self::Gone(_) | Self::InvalidAsset(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProvmarkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let id = SessionId::new();
        let errors = [
            ProvmarkError::InvalidAsset("x".into()),
            ProvmarkError::EmbeddingFailed {
                chunk: 4,
                attempts: 3,
                reason: "timeout".into(),
            },
            ProvmarkError::ReassemblyFailed("x".into()),
            ProvmarkError::SigningFailed("x".into()),
            ProvmarkError::NotFound(id),
            ProvmarkError::NotReady {
                status: SessionStatus::Processing,
            },
            ProvmarkError::Gone(id),
            ProvmarkError::DecodeUnavailable("x".into()),
        ];

        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_embedding_failed_message_names_chunk() {
        let err = ProvmarkError::EmbeddingFailed {
            chunk: 4,
            attempts: 3,
            reason: "accelerator timeout".into(),
        };
        let message = err.to_string();
        assert!(message.contains("chunk 4"));
        assert!(message.contains("3 attempt"));
    }
}

//! Sessions: one upload-to-result pipeline run each.
//!
//! ```text
//! uploading ──▶ processing ──▶ completed
//!     │              │
//!     └──────────────┴───────▶ failed
//! ```
//!
//! `completed` and `failed` are terminal. Every transition goes through
//! [`Session::transition`], which rejects anything not drawn above.

mod artifacts;
mod manager;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatcher::ChunkProgress;
use crate::error::{ProvmarkError, Result};

pub use artifacts::{
    Artifact, ArtifactHandle, ArtifactStore, ExpiryPolicy, FsArtifactStore, MemoryArtifactStore,
    Retention, RetrieveOnce, TimeToLive,
};
pub use manager::{ProgressReporter, SessionManager, SessionWriter, DEFAULT_SESSION_GRACE};

/// Opaque, unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for SessionId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn can_become(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Uploading, Processing) | (Uploading, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one session. Status and its associated fields always change together.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub status: SessionStatus,
    /// Verbatim terminal error, set only when `failed`.
    pub error: Option<String>,
    /// Machine code of the terminal error.
    pub error_code: Option<&'static str>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Finished artifact, set only when `completed`.
    pub result: Option<ArtifactHandle>,
    pub progress: ChunkProgress,
}

impl Session {
    fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: SessionStatus::Uploading,
            error: None,
            error_code: None,
            created_at: now,
            updated_at: now,
            result: None,
            progress: ChunkProgress::default(),
        }
    }

    /// Apply a transition, leaving the session untouched if it is not allowed.
    fn transition(&mut self, to: SessionStatus) -> Result<()> {
        if !self.status.can_become(to) {
            return Err(ProvmarkError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

//! Finished artifacts and how long they are kept.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use super::SessionId;
use crate::asset::{content_hash, extension_for_format};
use crate::error::{ProvmarkError, Result};

/// Default artifact lifetime.
pub const DEFAULT_ARTIFACT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Description of a stored artifact, set on a session when it completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactHandle {
    pub session_id: SessionId,
    pub format: String,
    pub file_name: String,
    pub size: u64,
    /// SHA3-256 of the artifact bytes, hex encoded.
    pub content_hash: String,
    pub stored_at: DateTime<Utc>,
}

impl ArtifactHandle {
    pub fn describe(session_id: SessionId, format: &str, title: &str, data: &[u8]) -> Self {
        Self {
            session_id,
            format: format.to_string(),
            file_name: Self::file_name_for(format, title),
            size: data.len() as u64,
            content_hash: content_hash(data),
            stored_at: Utc::now(),
        }
    }

    /// Download name for a watermarked copy of `title`.
    pub fn file_name_for(format: &str, title: &str) -> String {
        if title.contains('.') {
            format!("watermarked_{title}")
        } else {
            format!("watermarked_{title}.{}", extension_for_format(format))
        }
    }
}

/// An artifact handed back to a client.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub handle: ArtifactHandle,
    pub data: Vec<u8>,
}

/// Per-session artifact bytes.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, id: SessionId, data: Vec<u8>) -> Result<()>;

    async fn get(&self, id: SessionId) -> Result<Option<Vec<u8>>>;

    /// Returns whether anything was removed.
    async fn remove(&self, id: SessionId) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: DashMap<SessionId, Vec<u8>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, id: SessionId, data: Vec<u8>) -> Result<()> {
        self.artifacts.insert(id, data);
        Ok(())
    }

    async fn get(&self, id: SessionId) -> Result<Option<Vec<u8>>> {
        Ok(self.artifacts.get(&id).map(|a| a.value().clone()))
    }

    async fn remove(&self, id: SessionId) -> Result<bool> {
        Ok(self.artifacts.remove(&id).is_some())
    }
}

/// One file per session under a directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| storage_error(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: SessionId) -> PathBuf {
        self.root.join(format!("{id}.bin"))
    }
}

fn storage_error(path: &Path, err: std::io::Error) -> ProvmarkError {
    ProvmarkError::Storage(format!("{}: {err}", path.display()))
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, id: SessionId, data: Vec<u8>) -> Result<()> {
        let path = self.path_for(id);
        let tmp = path.with_extension("bin.tmp");
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| storage_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_error(&path, e))?;
        debug!(session_id = %id, bytes = data.len(), path = %path.display(), "Artifact written");
        Ok(())
    }

    async fn get(&self, id: SessionId) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(id);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(&path, e)),
        }
    }

    async fn remove(&self, id: SessionId) -> Result<bool> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_error(&path, e)),
        }
    }
}

/// Retention bookkeeping for one stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub stored_at: DateTime<Utc>,
    pub retrievals: u32,
    /// Admitted retrievals still reading from the store.
    pub in_flight: u32,
    pub evicted_at: Option<DateTime<Utc>>,
}

impl Retention {
    pub fn new(stored_at: DateTime<Utc>) -> Self {
        Self {
            stored_at,
            retrievals: 0,
            in_flight: 0,
            evicted_at: None,
        }
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted_at.is_some()
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.stored_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Decides when a stored artifact may be evicted.
pub trait ExpiryPolicy: Send + Sync + fmt::Debug {
    fn is_expired(&self, retention: &Retention, now: DateTime<Utc>) -> bool;
}

/// Expire a fixed time after storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeToLive(pub Duration);

impl Default for TimeToLive {
    fn default() -> Self {
        Self(DEFAULT_ARTIFACT_TTL)
    }
}

impl ExpiryPolicy for TimeToLive {
    fn is_expired(&self, retention: &Retention, now: DateTime<Utc>) -> bool {
        retention.age(now) >= self.0
    }
}

/// Expire after the first retrieval, or after `ttl` if never retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrieveOnce {
    pub ttl: Duration,
}

impl Default for RetrieveOnce {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_ARTIFACT_TTL,
        }
    }
}

impl ExpiryPolicy for RetrieveOnce {
    fn is_expired(&self, retention: &Retention, now: DateTime<Utc>) -> bool {
        retention.retrievals >= 1 || retention.age(now) >= self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_to_live() {
        let now = Utc::now();
        let policy = TimeToLive(Duration::from_secs(60));
        let fresh = Retention::new(now);
        let old = Retention::new(now - chrono::Duration::seconds(61));

        assert!(!policy.is_expired(&fresh, now));
        assert!(policy.is_expired(&old, now));
        assert_eq!(TimeToLive::default().0, DEFAULT_ARTIFACT_TTL);
    }

    #[test]
    fn test_retrieve_once() {
        let now = Utc::now();
        let policy = RetrieveOnce::default();
        let mut retention = Retention::new(now);
        assert!(!policy.is_expired(&retention, now));

        retention.retrievals = 1;
        assert!(policy.is_expired(&retention, now));
    }

    #[test]
    fn test_future_stored_at_has_zero_age() {
        let now = Utc::now();
        let retention = Retention::new(now + chrono::Duration::seconds(30));
        assert_eq!(retention.age(now), Duration::ZERO);
    }

    #[test]
    fn test_handle_file_name() {
        let id = SessionId::new();
        let handle = ArtifactHandle::describe(id, "video/x-ivf", "clip.ivf", b"data");
        assert_eq!(handle.file_name, "watermarked_clip.ivf");
        assert_eq!(handle.size, 4);

        let bare = ArtifactHandle::describe(id, "video/webm", "upload", b"");
        assert_eq!(bare.file_name, "watermarked_upload.webm");
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryArtifactStore::new();
        let id = SessionId::new();
        assert!(store.get(id).await.unwrap().is_none());

        store.put(id, b"artifact".to_vec()).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().as_deref(), Some(&b"artifact"[..]));
        assert!(store.remove(id).await.unwrap());
        assert!(!store.remove(id).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_fs_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path().join("artifacts")).await.unwrap();
        let id = SessionId::new();

        store.put(id, b"artifact".to_vec()).await.unwrap();
        assert!(store.root().join(format!("{id}.bin")).exists());
        assert_eq!(store.get(id).await.unwrap().as_deref(), Some(&b"artifact"[..]));

        assert!(store.remove(id).await.unwrap());
        assert!(store.get(id).await.unwrap().is_none());
        assert!(!store.remove(id).await.unwrap());
    }
}

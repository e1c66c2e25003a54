//! Registry of watermarked originals, keyed by payload.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::asset::OriginalRef;
use crate::payload::WatermarkPayload;
use crate::provenance::ManifestRecord;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    #[error("Catalog storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An original asset known to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub payload: WatermarkPayload,
    pub original: OriginalRef,
    pub manifest: ManifestRecord,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogMatch {
    pub entry: CatalogEntry,
    /// Hamming distance between the query and the entry payload.
    pub bit_errors: u32,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Nearest entry within `max_bit_errors`, exact matches first.
    async fn lookup(
        &self,
        payload: &WatermarkPayload,
        max_bit_errors: u32,
    ) -> Result<Option<CatalogMatch>, CatalogError>;

    async fn register(&self, entry: CatalogEntry) -> Result<(), CatalogError>;
}

/// In-memory catalog.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: DashMap<String, CatalogEntry>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn nearest(&self, payload: &WatermarkPayload, max_bit_errors: u32) -> Option<CatalogMatch> {
        if let Some(entry) = self.entries.get(&payload.to_hex()) {
            return Some(CatalogMatch {
                entry: entry.clone(),
                bit_errors: 0,
            });
        }
        self.entries
            .iter()
            .map(|e| (e.payload.hamming_distance(payload), e))
            .filter(|(distance, _)| *distance <= max_bit_errors)
            .min_by(|(da, a), (db, b)| da.cmp(db).then_with(|| a.key().cmp(b.key())))
            .map(|(bit_errors, e)| CatalogMatch {
                entry: e.value().clone(),
                bit_errors,
            })
    }

    fn snapshot(&self) -> Vec<CatalogEntry> {
        let mut entries: Vec<CatalogEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        entries
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn lookup(
        &self,
        payload: &WatermarkPayload,
        max_bit_errors: u32,
    ) -> Result<Option<CatalogMatch>, CatalogError> {
        Ok(self.nearest(payload, max_bit_errors))
    }

    async fn register(&self, entry: CatalogEntry) -> Result<(), CatalogError> {
        debug!(payload = %entry.payload, session_id = %entry.original.session_id, "Registering catalog entry");
        self.entries.insert(entry.payload.to_hex(), entry);
        Ok(())
    }
}

/// Memory catalog persisted as a JSON snapshot, rewritten on every register.
pub struct JsonFileCatalog {
    path: PathBuf,
    inner: MemoryCatalog,
    write_lock: Mutex<()>,
}

impl JsonFileCatalog {
    /// Open the catalog at `path`, loading existing entries if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref().to_path_buf();
        let inner = MemoryCatalog::new();
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let entries: Vec<CatalogEntry> = serde_json::from_slice(&bytes)?;
                for entry in entries {
                    inner.entries.insert(entry.payload.to_hex(), entry);
                }
                info!(path = %path.display(), entries = inner.len(), "Loaded catalog");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Catalog file absent, starting empty");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Self {
            path,
            inner,
            write_lock: Mutex::new(()),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    async fn persist(&self) -> Result<(), CatalogError> {
        let _guard = self.write_lock.lock().await;
        let json = serde_json::to_vec_pretty(&self.inner.snapshot())?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl Catalog for JsonFileCatalog {
    async fn lookup(
        &self,
        payload: &WatermarkPayload,
        max_bit_errors: u32,
    ) -> Result<Option<CatalogMatch>, CatalogError> {
        self.inner.lookup(payload, max_bit_errors).await
    }

    async fn register(&self, entry: CatalogEntry) -> Result<(), CatalogError> {
        self.inner.register(entry).await?;
        self.persist().await
    }
}

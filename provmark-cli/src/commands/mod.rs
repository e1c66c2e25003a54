//! Command implementations and the collaborators they share.

pub mod analyze;
pub mod watermark;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use chrono::{DateTime, Utc};
use provmark_core::{
    Catalog, FfprobeToolkit, HttpWatermarkConfig, HttpWatermarkService, IvfToolkit,
    JsonFileCatalog, LsbWatermarker, ManifestEngine, MediaToolkit, MemoryCatalog,
    MockManifestEngine, VideoAsset, WatermarkDetector, WatermarkEmbedder, IVF_MIME,
};
use tracing::{debug, info, warn};
use url::Url;

/// Watermark backend selection shared by all commands
#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    /// Use the in-process reference watermarker and mock manifests (for testing)
    #[arg(long, conflicts_with = "service")]
    pub mock: bool,

    /// Base URL of a remote watermark service
    #[arg(long, value_name = "URL")]
    pub service: Option<Url>,

    /// JSON catalog of watermarked originals
    #[arg(long, value_name = "PATH")]
    pub catalog: Option<PathBuf>,
}

/// A session that ended in `failed`.
#[derive(Debug)]
pub struct SessionFailure {
    /// Machine error code recorded on the session
    pub code: &'static str,
    pub message: String,
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for SessionFailure {}

pub struct Watermarker {
    pub embedder: Arc<dyn WatermarkEmbedder>,
    pub detector: Arc<dyn WatermarkDetector>,
}

impl BackendArgs {
    pub fn watermarker(&self) -> Result<Watermarker> {
        if let Some(url) = &self.service {
            info!(url = %url, "Using remote watermark service");
            let service = Arc::new(
                HttpWatermarkService::new(HttpWatermarkConfig::new(url.clone()))
                    .context("Failed to create watermark service client")?,
            );
            return Ok(Watermarker {
                embedder: service.clone(),
                detector: service,
            });
        }
        if self.mock {
            warn!("Using MOCK watermarker (not robust to re-encoding)");
            let lsb = Arc::new(LsbWatermarker::default());
            return Ok(Watermarker {
                embedder: lsb.clone(),
                detector: lsb,
            });
        }
        bail!("No watermark backend selected: pass --mock or --service <URL>")
    }

    /// Manifest engine for signing; `reading_only` falls back to the mock
    /// reader when no signer is configured.
    pub fn manifest_engine(&self, reading_only: bool) -> Result<Arc<dyn ManifestEngine>> {
        if self.mock {
            return Ok(Arc::new(MockManifestEngine::new()));
        }
        match signing_engine() {
            Ok(engine) => Ok(engine),
            Err(e) if reading_only => {
                debug!(error = %e, "No signer configured, reading mock manifests only");
                Ok(Arc::new(MockManifestEngine::new()))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn catalog(&self) -> Result<Arc<dyn Catalog>> {
        match &self.catalog {
            Some(path) => {
                let catalog = JsonFileCatalog::open(path).await.with_context(|| {
                    format!("Failed to open catalog: {}", path.display())
                })?;
                Ok(Arc::new(catalog))
            }
            None => Ok(Arc::new(MemoryCatalog::new())),
        }
    }
}

#[cfg(feature = "c2pa")]
fn signing_engine() -> Result<Arc<dyn ManifestEngine>> {
    let engine = provmark_core::C2paManifestEngine::from_env()
        .context("C2PA signer unavailable (set C2PA_SIGNING_KEY/C2PA_SIGNING_CERT or pass --mock)")?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "c2pa"))]
fn signing_engine() -> Result<Arc<dyn ManifestEngine>> {
    bail!("No manifest signer: built without the c2pa feature (pass --mock for mock manifests)")
}

/// Read a video from disk.
pub fn read_asset(path: &Path) -> Result<VideoAsset> {
    let asset = VideoAsset::from_path(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    if asset.is_empty() {
        bail!("Failed to read file: {} is empty", path.display());
    }
    info!(path = %path.display(), bytes = asset.len(), format = %asset.format, "Read file");
    Ok(asset)
}

/// Media toolkit able to parse `asset`.
pub fn toolkit_for(asset: &VideoAsset) -> Arc<dyn MediaToolkit> {
    if asset.format == IVF_MIME {
        Arc::new(IvfToolkit::new())
    } else {
        debug!(format = %asset.format, "Probing container with ffprobe");
        Arc::new(FfprobeToolkit::new())
    }
}

pub fn format_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

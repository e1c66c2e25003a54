//! Application state module
//!
//! Builds the pipeline, session manager and analyzer from [`Config`] and
//! shares them across all request handlers.

use std::sync::Arc;

use provmark_core::{
    AcceleratorGate, Analyzer, ArtifactStore, Catalog, CatalogError, Chunker, FfprobeToolkit,
    FsArtifactStore, HttpWatermarkConfig, HttpWatermarkService, IvfToolkit, JsonFileCatalog,
    LsbWatermarker, ManifestEngine, ManifestError, MediaToolkit, MemoryArtifactStore,
    MemoryCatalog, MockManifestEngine, Pipeline, ProvenanceSigner, ProvmarkError, Reassembler,
    SessionManager, TimeToLive, WatermarkDetector, WatermarkDispatcher, WatermarkEmbedder,
    WatermarkError,
};
use thiserror::Error;
use url::Url;

use crate::config::{Config, MediaToolkitKind};

/// Failures while wiring collaborators at startup.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("No watermark service configured: set WATERMARK_SERVICE_URL or ALLOW_MOCK_WATERMARK=true")]
    NoWatermarkService,

    #[error("No manifest signer available ({0}); configure C2PA credentials or set ALLOW_MOCK_SIGNING=true")]
    NoSigner(String),

    #[error("Invalid WATERMARK_SERVICE_URL: {0}")]
    InvalidServiceUrl(#[from] url::ParseError),

    #[error(transparent)]
    Watermark(#[from] WatermarkError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Storage(#[from] ProvmarkError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    /// Session registry driving the watermark pipeline
    pub sessions: SessionManager,
    /// Analyzer resolving candidates against the same catalog
    pub analyzer: Arc<Analyzer>,
    /// Accelerator gate shared by every session (exposed for health)
    pub gate: AcceleratorGate,
    /// Upload size limit in bytes
    pub max_upload_bytes: usize,
    /// Name of the active watermark backend
    pub watermark_backend: &'static str,
    /// Name of the active manifest engine
    pub manifest_engine: &'static str,
}

impl AppState {
    /// Build state with the persistent stores named in `config`.
    pub async fn from_config(config: &Config) -> Result<Self, SetupError> {
        let store: Arc<dyn ArtifactStore> = match &config.artifact_dir {
            Some(dir) => {
                tracing::info!(dir = %dir.display(), "Artifacts stored on disk");
                Arc::new(FsArtifactStore::open(dir).await?)
            }
            None => Arc::new(MemoryArtifactStore::new()),
        };
        let catalog: Arc<dyn Catalog> = match &config.catalog_path {
            Some(path) => Arc::new(JsonFileCatalog::open(path).await?),
            None => Arc::new(MemoryCatalog::new()),
        };
        Self::assemble(config, store, catalog)
    }

    /// Build state with in-memory artifact store and catalog.
    pub fn in_memory(config: &Config) -> Result<Self, SetupError> {
        Self::assemble(
            config,
            Arc::new(MemoryArtifactStore::new()),
            Arc::new(MemoryCatalog::new()),
        )
    }

    /// In-process collaborators only (LSB watermarker, mock manifests).
    pub fn mock(config: &Config) -> Self {
        let watermarker = Arc::new(LsbWatermarker::default());
        let engine: Arc<dyn ManifestEngine> = Arc::new(MockManifestEngine::new());
        Self::build(
            config,
            Collaborators {
                embedder: watermarker.clone(),
                detector: watermarker,
                engine,
                store: Arc::new(MemoryArtifactStore::new()),
                catalog: Arc::new(MemoryCatalog::new()),
            },
        )
    }

    fn assemble(
        config: &Config,
        store: Arc<dyn ArtifactStore>,
        catalog: Arc<dyn Catalog>,
    ) -> Result<Self, SetupError> {
        let (embedder, detector) = watermark_backend(config)?;
        let engine = manifest_engine(config)?;
        Ok(Self::build(
            config,
            Collaborators {
                embedder,
                detector,
                engine,
                store,
                catalog,
            },
        ))
    }

    fn build(config: &Config, parts: Collaborators) -> Self {
        let toolkit: Arc<dyn MediaToolkit> = match config.media_toolkit {
            MediaToolkitKind::Ivf => Arc::new(IvfToolkit::new()),
            MediaToolkitKind::Ffprobe => Arc::new(FfprobeToolkit::new()),
        };
        let gate = AcceleratorGate::new(config.accelerator_concurrency);
        let watermark_backend = parts.embedder.name();
        let manifest_engine = parts.engine.name();

        let mut signer =
            ProvenanceSigner::new(parts.engine.clone()).with_timeout(config.signing_timeout());
        if let Some(producer) = &config.manifest_producer {
            signer = signer.with_producer(producer.clone());
        }

        let pipeline = Pipeline::new(
            Chunker::new(toolkit.clone(), config.chunk_policy()),
            WatermarkDispatcher::new(parts.embedder, gate.clone(), config.dispatch_config()),
            Reassembler::new(toolkit.clone()),
            signer,
            parts.catalog.clone(),
        )
        .with_payload_mode(config.payload_mode);

        let sessions = SessionManager::new(
            Arc::new(pipeline),
            parts.store,
            Arc::new(TimeToLive(config.artifact_ttl())),
        )
        .with_session_grace(config.session_grace());

        let analyzer = Analyzer::new(
            Chunker::new(toolkit, config.chunk_policy()),
            parts.detector,
            parts.engine,
            parts.catalog,
        )
        .with_config(config.analyzer_config());

        tracing::info!(
            watermark = watermark_backend,
            manifest = manifest_engine,
            accelerator_concurrency = gate.capacity(),
            payload_mode = config.payload_mode.as_str(),
            "Pipeline assembled"
        );

        Self {
            sessions,
            analyzer: Arc::new(analyzer),
            gate,
            max_upload_bytes: config.max_upload_bytes(),
            watermark_backend,
            manifest_engine,
        }
    }
}

struct Collaborators {
    embedder: Arc<dyn WatermarkEmbedder>,
    detector: Arc<dyn WatermarkDetector>,
    engine: Arc<dyn ManifestEngine>,
    store: Arc<dyn ArtifactStore>,
    catalog: Arc<dyn Catalog>,
}

type WatermarkPair = (Arc<dyn WatermarkEmbedder>, Arc<dyn WatermarkDetector>);

fn watermark_backend(config: &Config) -> Result<WatermarkPair, SetupError> {
    if let Some(url) = &config.watermark_service_url {
        let mut service_config = HttpWatermarkConfig::new(Url::parse(url)?);
        service_config.timeout = config.dispatch_config().call_timeout;
        service_config.api_key = config.watermark_service_api_key.clone();
        let service = Arc::new(HttpWatermarkService::new(service_config)?);
        tracing::info!(url = %url, "Using remote watermark service");
        let embedder: Arc<dyn WatermarkEmbedder> = service.clone();
        let detector: Arc<dyn WatermarkDetector> = service;
        return Ok((embedder, detector));
    }
    if config.allow_mock_watermark {
        tracing::warn!("Using in-process LSB watermarker (mock mode)");
        let watermarker = Arc::new(LsbWatermarker::default());
        let embedder: Arc<dyn WatermarkEmbedder> = watermarker.clone();
        let detector: Arc<dyn WatermarkDetector> = watermarker;
        return Ok((embedder, detector));
    }
    Err(SetupError::NoWatermarkService)
}

#[cfg(feature = "c2pa")]
fn manifest_engine(config: &Config) -> Result<Arc<dyn ManifestEngine>, SetupError> {
    match provmark_core::C2paManifestEngine::from_env() {
        Ok(engine) => {
            tracing::info!("Using C2PA manifest engine");
            Ok(Arc::new(engine))
        }
        Err(e) if config.allow_mock_signing => {
            tracing::warn!(error = %e, "C2PA signer unavailable, using mock manifests");
            Ok(Arc::new(MockManifestEngine::new()))
        }
        Err(e) => Err(SetupError::NoSigner(e.to_string())),
    }
}

#[cfg(not(feature = "c2pa"))]
fn manifest_engine(config: &Config) -> Result<Arc<dyn ManifestEngine>, SetupError> {
    if config.allow_mock_signing {
        tracing::warn!("Built without C2PA support, using mock manifests");
        Ok(Arc::new(MockManifestEngine::new()))
    } else {
        Err(SetupError::NoSigner("built without the c2pa feature".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_with_mocks() {
        let state = AppState::in_memory(&Config::default()).unwrap();
        assert_eq!(state.watermark_backend, "lsb");
        assert_eq!(state.gate.capacity(), 1);
        assert!(state.sessions.is_empty());
    }

    #[test]
    fn test_requires_watermark_service_without_mocks() {
        let config = Config {
            allow_mock_watermark: false,
            ..Config::default()
        };
        assert!(matches!(
            AppState::in_memory(&config),
            Err(SetupError::NoWatermarkService)
        ));
    }

    #[test]
    fn test_rejects_invalid_service_url() {
        let config = Config {
            watermark_service_url: Some("not a url".into()),
            ..Config::default()
        };
        assert!(matches!(
            AppState::in_memory(&config),
            Err(SetupError::InvalidServiceUrl(_))
        ));
    }

    #[test]
    fn test_remote_service_backend() {
        let config = Config {
            watermark_service_url: Some("http://gpu-node:8080/".into()),
            allow_mock_watermark: false,
            ..Config::default()
        };
        let state = AppState::in_memory(&config).unwrap();
        assert_eq!(state.watermark_backend, "http");
    }

    #[tokio::test]
    async fn test_from_config_with_persistent_stores() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            artifact_dir: Some(dir.path().join("artifacts")),
            catalog_path: Some(dir.path().join("catalog.json")),
            ..Config::default()
        };
        let state = AppState::from_config(&config).await.unwrap();
        assert!(dir.path().join("artifacts").is_dir());
        assert_eq!(state.max_upload_bytes, 500 * 1024 * 1024);
    }
}

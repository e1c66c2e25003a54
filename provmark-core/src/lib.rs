//! Provmark Core - session-driven video watermarking and provenance
//!
//! This crate splits a video into independently embeddable chunks, sends
//! them through a shared, bounded watermark accelerator, reassembles the
//! result, signs a content-provenance manifest into it and tracks the whole
//! run as a session. The inverse [`Analyzer`] decodes a payload from any
//! video and resolves it against a [`Catalog`] of known originals.
//!
//! # Features
//!
//! - Keyframe-aligned chunking over a pluggable [`MediaToolkit`]
//! - One accelerator gate shared by every session, with per-call timeouts
//!   and exponential backoff for transient failures
//! - Byte-exact reassembly validated against the source timeline
//! - C2PA manifests (`c2pa` feature) or a mock engine for testing
//! - Session-wide or per-chunk 96-bit payloads
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use provmark_core::{
//!     AcceleratorGate, Chunker, ChunkPolicy, DispatchConfig, IvfToolkit, LsbWatermarker,
//!     MediaToolkit, MemoryArtifactStore, MemoryCatalog, MockManifestEngine, Pipeline,
//!     ProvenanceSigner, Reassembler, SessionManager, TimeToLive, VideoAsset,
//!     WatermarkDispatcher,
//! };
//!
//! # async fn example() -> provmark_core::Result<()> {
//! let toolkit: Arc<dyn MediaToolkit> = Arc::new(IvfToolkit::new());
//! let pipeline = Pipeline::new(
//!     Chunker::new(toolkit.clone(), ChunkPolicy::default()),
//!     WatermarkDispatcher::new(
//!         Arc::new(LsbWatermarker::default()),
//!         AcceleratorGate::new(1),
//!         DispatchConfig::default(),
//!     ),
//!     Reassembler::new(toolkit),
//!     ProvenanceSigner::new(Arc::new(MockManifestEngine::new())),
//!     Arc::new(MemoryCatalog::new()),
//! );
//! let sessions = SessionManager::new(
//!     Arc::new(pipeline),
//!     Arc::new(MemoryArtifactStore::new()),
//!     Arc::new(TimeToLive::default()),
//! );
//!
//! let asset = VideoAsset::from_path("clip.ivf".as_ref())
//!     .map_err(|e| provmark_core::ProvmarkError::InvalidAsset(e.to_string()))?;
//! let id = sessions.create(asset)?;
//! sessions.wait_for_terminal(id).await?;
//! let artifact = sessions.result(id).await?;
//! println!("{} bytes", artifact.data.len());
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod asset;
pub mod catalog;
pub mod chunker;
pub mod dispatcher;
pub mod error;
pub mod media;
pub mod payload;
pub mod pipeline;
pub mod provenance;
pub mod reassembler;
pub mod session;
pub mod watermark;

// Re-export main types for convenience
pub use analyzer::{AnalysisReport, Analyzer, AnalyzerConfig};
pub use asset::{OriginalRef, VideoAsset, DEFAULT_VIDEO_MIME, IVF_MIME};
pub use catalog::{Catalog, CatalogEntry, CatalogError, CatalogMatch, JsonFileCatalog, MemoryCatalog};
pub use chunker::{plan_chunks, Chunk, ChunkPolicy, ChunkSet, ChunkState, Chunker};
pub use dispatcher::{AcceleratorGate, ChunkProgress, DispatchConfig, WatermarkDispatcher};
pub use error::{ProvmarkError, Result};
pub use media::{FfprobeToolkit, IvfBuilder, IvfToolkit, MediaError, MediaLayout, MediaToolkit, MediaUnit};
pub use payload::{Detection, PayloadMode, PayloadPlan, WatermarkPayload, PAYLOAD_BITS};
pub use pipeline::{Pipeline, PipelineOutput};
pub use provenance::{
    GeneratorInfo, ManifestDefinition, ManifestEngine, ManifestError, ManifestRecord,
    MockManifestEngine, ProvenanceSigner,
};
pub use reassembler::Reassembler;
pub use session::{
    Artifact, ArtifactHandle, ArtifactStore, ExpiryPolicy, FsArtifactStore, MemoryArtifactStore,
    RetrieveOnce, Session, SessionId, SessionManager, SessionStatus, TimeToLive,
};
pub use watermark::{LsbWatermarker, WatermarkDetector, WatermarkEmbedder, WatermarkError};

// Network-dependent exports
#[cfg(feature = "network")]
pub use watermark::{HttpWatermarkConfig, HttpWatermarkService};

#[cfg(feature = "c2pa")]
pub use provenance::{C2paManifestEngine, CertSigner};

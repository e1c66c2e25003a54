//! One session's run from uploaded asset to signed artifact.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::asset::{OriginalRef, VideoAsset};
use crate::catalog::{Catalog, CatalogEntry};
use crate::chunker::{ChunkSet, Chunker};
use crate::dispatcher::{ChunkProgress, WatermarkDispatcher};
use crate::error::{ProvmarkError, Result};
use crate::payload::{PayloadMode, PayloadPlan, WatermarkPayload};
use crate::provenance::{ManifestRecord, ProvenanceSigner, SigningContext};
use crate::reassembler::Reassembler;
use crate::session::SessionId;

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Signed, watermarked asset.
    pub data: Vec<u8>,
    pub format: String,
    /// Title of the original asset.
    pub title: String,
    pub original: OriginalRef,
    /// Manifest as read back from `data`.
    pub manifest: ManifestRecord,
    /// Every payload embedded, in chunk order for per-chunk payloads.
    pub payloads: Vec<WatermarkPayload>,
    pub chunk_count: usize,
}

/// Chunker → dispatcher → reassembler → signer, then catalog registration.
pub struct Pipeline {
    chunker: Chunker,
    dispatcher: WatermarkDispatcher,
    reassembler: Reassembler,
    signer: ProvenanceSigner,
    catalog: Arc<dyn Catalog>,
    payload_mode: PayloadMode,
}

impl Pipeline {
    pub fn new(
        chunker: Chunker,
        dispatcher: WatermarkDispatcher,
        reassembler: Reassembler,
        signer: ProvenanceSigner,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        Self {
            chunker,
            dispatcher,
            reassembler,
            signer,
            catalog,
            payload_mode: PayloadMode::default(),
        }
    }

    pub fn with_payload_mode(mut self, mode: PayloadMode) -> Self {
        self.payload_mode = mode;
        self
    }

    pub fn payload_mode(&self) -> PayloadMode {
        self.payload_mode
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    pub fn dispatcher(&self) -> &WatermarkDispatcher {
        &self.dispatcher
    }

    pub fn signer(&self) -> &ProvenanceSigner {
        &self.signer
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// Run every stage in order. Each stage starts only after the previous
    /// one finished; the first error ends the run.
    #[instrument(level = "debug", skip_all, fields(session_id = %session_id, bytes = asset.len()))]
    pub async fn run<F>(
        &self,
        session_id: SessionId,
        asset: VideoAsset,
        on_progress: F,
    ) -> Result<PipelineOutput>
    where
        F: FnMut(ChunkProgress) + Send,
    {
        let original = OriginalRef::describe(session_id.to_string(), &asset);
        let ChunkSet { layout, chunks } = self.chunker.split(&asset).await?;
        let chunk_count = chunks.len();
        let plan = PayloadPlan::new(session_id, self.payload_mode);
        info!(
            session_id = %session_id,
            chunks = chunk_count,
            container = %layout.container,
            payload_mode = plan.mode().as_str(),
            "Asset chunked"
        );

        let embedded = self.dispatcher.dispatch(chunks, &plan, on_progress).await?;
        let joined = self
            .reassembler
            .reassemble(&layout, &asset.format, embedded)
            .await?;

        let definition = self.signer.build_definition(&SigningContext {
            session_id,
            original: &original,
            plan: &plan,
            chunk_count,
            processed_at: Utc::now(),
        });
        let signed = self.signer.sign(&asset.format, joined, definition).await?;
        let manifest = match self.signer.engine().read(&asset.format, &signed) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => {
                return Err(ProvmarkError::SigningFailed(
                    "signed asset carries no manifest".into(),
                ))
            }
            Err(e) => {
                return Err(ProvmarkError::SigningFailed(format!(
                    "signed manifest is unreadable: {e}"
                )))
            }
        };

        let payloads = plan.all_payloads(chunk_count);
        self.register(&payloads, &original, &manifest).await;
        info!(session_id = %session_id, bytes = signed.len(), "Asset watermarked and signed");

        Ok(PipelineOutput {
            data: signed,
            format: asset.format,
            title: original.title.clone(),
            original,
            manifest,
            payloads,
            chunk_count,
        })
    }

    /// Registration failures leave the artifact intact; they only cost
    /// later matching.
    async fn register(
        &self,
        payloads: &[WatermarkPayload],
        original: &OriginalRef,
        manifest: &ManifestRecord,
    ) {
        for payload in payloads {
            let entry = CatalogEntry {
                payload: *payload,
                original: original.clone(),
                manifest: manifest.clone(),
                registered_at: Utc::now(),
            };
            if let Err(e) = self.catalog.register(entry).await {
                warn!(
                    session_id = %original.session_id,
                    payload = %payload,
                    error = %e,
                    "Catalog registration failed"
                );
            }
        }
    }
}

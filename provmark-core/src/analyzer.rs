//! Identifying a previously watermarked video.
//!
//! The analyzer reads whatever manifest the candidate carries, decodes a
//! payload from every chunk-sized window and resolves the best supported
//! payload against the catalog. Missing manifests, missing watermarks and
//! unknown payloads are all ordinary outcomes.

use std::ops::Range;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::asset::VideoAsset;
use crate::catalog::{Catalog, CatalogMatch};
use crate::chunker::Chunker;
use crate::error::{ProvmarkError, Result};
use crate::payload::{Detection, WatermarkPayload};
use crate::provenance::{ManifestEngine, ManifestRecord};
use crate::watermark::WatermarkDetector;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyzerConfig {
    /// Detections below this confidence count as "no watermark".
    pub confidence_threshold: f32,
    /// Largest Hamming distance accepted by catalog lookups.
    pub max_bit_errors: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            max_bit_errors: 10,
        }
    }
}

/// Outcome of analyzing one asset.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    /// Manifest embedded in the candidate, if any.
    pub manifest: Option<ManifestRecord>,
    /// Best supported confident detection, if any.
    pub detection: Option<Detection>,
    /// Catalog entry for the detected payload, if any.
    pub matched: Option<CatalogMatch>,
    /// Windows decoded.
    pub windows: usize,
    /// Windows agreeing with `detection`.
    pub votes: usize,
}

impl AnalysisReport {
    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }
}

struct Window {
    data: Vec<u8>,
    essence: Vec<Range<usize>>,
}

#[derive(Debug)]
struct Candidate {
    payload: WatermarkPayload,
    votes: usize,
    confidence_sum: f32,
}

impl Candidate {
    fn mean_confidence(&self) -> f32 {
        self.confidence_sum / self.votes as f32
    }

    fn detection(&self) -> Detection {
        Detection {
            payload: self.payload,
            confidence: self.mean_confidence(),
        }
    }
}

pub struct Analyzer {
    chunker: Chunker,
    detector: Arc<dyn WatermarkDetector>,
    manifests: Arc<dyn ManifestEngine>,
    catalog: Arc<dyn Catalog>,
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(
        chunker: Chunker,
        detector: Arc<dyn WatermarkDetector>,
        manifests: Arc<dyn ManifestEngine>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        Self {
            chunker,
            detector,
            manifests,
            catalog,
            config: AnalyzerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AnalyzerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Read the manifest, decode the watermark and resolve it in the catalog.
    ///
    /// A missing or unreadable manifest, an unprobeable asset and an absent
    /// watermark are all reported in the [`AnalysisReport`], not as errors.
    ///
    /// # Arguments
    ///
    /// * `asset` - The video to identify, watermarked or not.
    ///
    /// # Errors
    ///
    /// Returns [`ProvmarkError::DecodeUnavailable`] when the detector or the
    /// catalog cannot be reached.
    #[instrument(level = "debug", skip_all, fields(size = asset.len(), detector = self.detector.name()))]
    pub async fn analyze(&self, asset: &VideoAsset) -> Result<AnalysisReport> {
        let manifest = match self.manifests.read(&asset.format, &asset.data) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(error = %e, "Unreadable manifest, reporting none");
                None
            }
        };

        let windows = self.windows(asset).await;
        let window_count = windows.len();
        let candidates = self.decode(windows).await?;

        let mut detection = candidates.first().map(Candidate::detection);
        let mut votes = candidates.first().map(|c| c.votes).unwrap_or(0);
        let mut matched = None;
        for candidate in &candidates {
            let found = self
                .catalog
                .lookup(&candidate.payload, self.config.max_bit_errors)
                .await
                .map_err(|e| ProvmarkError::DecodeUnavailable(format!("catalog lookup failed: {e}")))?;
            if let Some(found) = found {
                detection = Some(candidate.detection());
                votes = candidate.votes;
                matched = Some(found);
                break;
            }
        }

        info!(
            manifest = manifest.is_some(),
            detected = detection.is_some(),
            matched = matched.is_some(),
            windows = window_count,
            votes,
            "Asset analyzed"
        );
        Ok(AnalysisReport {
            manifest,
            detection,
            matched,
            windows: window_count,
            votes,
        })
    }

    /// Chunk-sized windows, or the whole asset when it cannot be probed.
    async fn windows(&self, asset: &VideoAsset) -> Vec<Window> {
        match self.chunker.split(asset).await {
            Ok(set) => set
                .chunks
                .into_iter()
                .map(|chunk| Window {
                    data: chunk.data,
                    essence: chunk.essence,
                })
                .collect(),
            Err(e) => {
                debug!(error = %e, "Candidate not chunkable, decoding as one window");
                vec![Window {
                    essence: vec![0..asset.len()],
                    data: asset.data.clone(),
                }]
            }
        }
    }

    /// Confident detections grouped by payload, most supported first.
    async fn decode(&self, windows: Vec<Window>) -> Result<Vec<Candidate>> {
        let mut candidates: Vec<Candidate> = Vec::new();
        for (index, window) in windows.iter().enumerate() {
            let detection = self
                .detector
                .detect(&window.data, &window.essence)
                .await
                .map_err(|e| ProvmarkError::DecodeUnavailable(e.to_string()))?;
            if !detection.is_confident(self.config.confidence_threshold) {
                continue;
            }
            debug!(window = index, payload = %detection.payload, confidence = detection.confidence, "Watermark detected");
            match candidates.iter_mut().find(|c| c.payload == detection.payload) {
                Some(candidate) => {
                    candidate.votes += 1;
                    candidate.confidence_sum += detection.confidence;
                }
                None => candidates.push(Candidate {
                    payload: detection.payload,
                    votes: 1,
                    confidence_sum: detection.confidence,
                }),
            }
        }
        candidates.sort_by(|a, b| {
            b.votes
                .cmp(&a.votes)
                .then_with(|| b.mean_confidence().total_cmp(&a.mean_confidence()))
        });
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::IVF_MIME;
    use crate::catalog::MemoryCatalog;
    use crate::chunker::ChunkPolicy;
    use crate::media::ivf::IvfToolkit;
    use crate::payload::PayloadMode;
    use crate::pipeline::tests::{ivf_asset, pipeline_with};
    use crate::provenance::MockManifestEngine;
    use crate::session::SessionId;
    use crate::watermark::LsbWatermarker;
    use crate::watermark::WatermarkError;
    use async_trait::async_trait;

    fn analyzer(catalog: Arc<dyn Catalog>, detector: Arc<dyn WatermarkDetector>) -> Analyzer {
        Analyzer::new(
            Chunker::new(Arc::new(IvfToolkit::new()), ChunkPolicy::Frames(8)),
            detector,
            Arc::new(MockManifestEngine::new()),
            catalog,
        )
    }

    async fn watermarked(catalog: Arc<MemoryCatalog>, mode: PayloadMode) -> (SessionId, VideoAsset) {
        let id = SessionId::new();
        let output = pipeline_with(MockManifestEngine::new(), catalog)
            .with_payload_mode(mode)
            .run(id, ivf_asset(3), |_| {})
            .await
            .unwrap();
        (id, VideoAsset::new(output.data, IVF_MIME))
    }

    struct OfflineDetector;

    #[async_trait]
    impl WatermarkDetector for OfflineDetector {
        fn name(&self) -> &'static str {
            "offline"
        }

        async fn detect(
            &self,
            _data: &[u8],
            _essence: &[Range<usize>],
        ) -> std::result::Result<Detection, WatermarkError> {
            Err(WatermarkError::Transient("accelerator offline".into()))
        }
    }

    #[tokio::test]
    async fn test_matches_watermarked_asset() {
        let catalog = Arc::new(MemoryCatalog::new());
        let (id, asset) = watermarked(catalog.clone(), PayloadMode::Session).await;

        let report = analyzer(catalog, Arc::new(LsbWatermarker::default()))
            .analyze(&asset)
            .await
            .unwrap();

        let matched = report.matched.unwrap();
        assert_eq!(matched.entry.original.session_id, id.to_string());
        assert_eq!(matched.bit_errors, 0);
        assert_eq!(report.votes, 3);
        assert_eq!(report.windows, 3);
        assert_eq!(report.manifest.unwrap().title, "watermarked_clip.ivf");
    }

    #[tokio::test]
    async fn test_per_chunk_payloads_match() {
        let catalog = Arc::new(MemoryCatalog::new());
        let (id, asset) = watermarked(catalog.clone(), PayloadMode::PerChunk).await;

        let report = analyzer(catalog, Arc::new(LsbWatermarker::default()))
            .analyze(&asset)
            .await
            .unwrap();
        assert_eq!(report.matched.unwrap().entry.original.session_id, id.to_string());
        assert_eq!(report.votes, 1);
    }

    #[tokio::test]
    async fn test_unmarked_asset_is_no_match() {
        let report = analyzer(
            Arc::new(MemoryCatalog::new()),
            Arc::new(LsbWatermarker::default()),
        )
        .analyze(&ivf_asset(2))
        .await
        .unwrap();

        assert!(report.manifest.is_none());
        assert!(report.detection.is_none());
        assert!(!report.is_match());
    }

    #[tokio::test]
    async fn test_watermark_without_catalog_entry() {
        let (_, asset) = watermarked(Arc::new(MemoryCatalog::new()), PayloadMode::Session).await;

        let report = analyzer(
            Arc::new(MemoryCatalog::new()),
            Arc::new(LsbWatermarker::default()),
        )
        .analyze(&asset)
        .await
        .unwrap();
        assert!(report.detection.is_some());
        assert!(report.manifest.is_some());
        assert!(report.matched.is_none());
    }

    #[tokio::test]
    async fn test_unprobeable_asset_is_one_window() {
        let asset = VideoAsset::new(vec![0u8; 64], "video/mp4");
        let report = analyzer(
            Arc::new(MemoryCatalog::new()),
            Arc::new(LsbWatermarker::default()),
        )
        .analyze(&asset)
        .await
        .unwrap();
        assert_eq!(report.windows, 1);
        assert!(!report.is_match());
    }

    #[tokio::test]
    async fn test_detector_failure_is_decode_unavailable() {
        let err = analyzer(Arc::new(MemoryCatalog::new()), Arc::new(OfflineDetector))
            .analyze(&ivf_asset(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvmarkError::DecodeUnavailable(_)));
    }

    #[tokio::test]
    async fn test_tampered_manifest_reported_as_none() {
        let catalog = Arc::new(MemoryCatalog::new());
        let (id, asset) = watermarked(catalog.clone(), PayloadMode::Session).await;
        let mut data = asset.data;
        // Flip an LSB inside the first frame's essence; the manifest digest
        // no longer matches but the vote still carries the payload.
        data[32 + 12 + 20] ^= 0x01;

        let report = analyzer(catalog, Arc::new(LsbWatermarker::default()))
            .analyze(&VideoAsset::new(data, IVF_MIME))
            .await
            .unwrap();
        assert!(report.manifest.is_none());
        assert_eq!(report.matched.unwrap().entry.original.session_id, id.to_string());
    }
}

//! Analysis handler
//!
//! Handles POST /analyze requests: reads the manifest, decodes the
//! watermark and resolves it against the catalog of processed videos.

use axum::{
    extract::{Multipart, State},
    Json,
};
use chrono::{DateTime, Utc};
use provmark_core::{AnalysisReport, CatalogMatch, ManifestRecord};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::multipart::MultipartFields;
use crate::state::AppState;

/// Manifest found in the analyzed video
#[derive(Serialize, ToSchema)]
pub struct ManifestSummary {
    #[schema(example = "watermarked_interview.mp4")]
    pub title: String,
    #[schema(example = "video/mp4")]
    pub format: String,
    /// Claim generator as "name/version"
    #[schema(example = "provmark/0.1.0")]
    pub generator: Option<String>,
    #[schema(example = "Newsroom")]
    pub producer: Option<String>,
    pub signature_issuer: Option<String>,
    pub signature_time: Option<String>,
    /// Titles of the ingredients (the original upload)
    pub ingredients: Vec<String>,
    /// Payload recorded in the watermark assertion
    #[schema(example = "8f3a61c09e2b44d17a5c0e93")]
    pub payload_hex: Option<String>,
}

impl From<ManifestRecord> for ManifestSummary {
    fn from(record: ManifestRecord) -> Self {
        let payload_hex = record.watermark_payload().map(|p| p.to_hex());
        Self {
            generator: record.generator.as_ref().map(|g| g.to_string()),
            ingredients: record.ingredients.into_iter().map(|i| i.title).collect(),
            title: record.title,
            format: record.format,
            producer: record.producer,
            signature_issuer: record.signature_issuer,
            signature_time: record.signature_time,
            payload_hex,
        }
    }
}

/// Watermark decoding outcome
#[derive(Serialize, ToSchema)]
pub struct WatermarkSummary {
    /// Whether a confident payload was decoded
    #[schema(example = true)]
    pub detected: bool,
    #[schema(example = "8f3a61c09e2b44d17a5c0e93")]
    pub payload_hex: Option<String>,
    /// Mean confidence of the windows carrying the payload
    #[schema(example = 0.97)]
    pub confidence: Option<f32>,
    /// Windows agreeing with the payload
    #[schema(example = 10)]
    pub votes: usize,
    /// Windows decoded
    #[schema(example = 10)]
    pub windows: usize,
}

/// Original video the payload resolved to
#[derive(Serialize, ToSchema)]
pub struct MatchSummary {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub session_id: String,
    #[schema(example = "interview.mp4")]
    pub title: String,
    #[schema(example = "video/mp4")]
    pub format: String,
    /// SHA3-256 of the original upload
    pub content_hash: String,
    #[schema(example = 104857600_u64)]
    pub size: u64,
    /// Hamming distance between decoded and registered payload
    #[schema(example = 0)]
    pub bit_errors: u32,
    pub registered_at: DateTime<Utc>,
    /// Manifest signed when the original was watermarked
    pub manifest: ManifestSummary,
}

impl From<CatalogMatch> for MatchSummary {
    fn from(found: CatalogMatch) -> Self {
        let original = found.entry.original;
        Self {
            manifest: found.entry.manifest.into(),
            session_id: original.session_id,
            title: original.title,
            format: original.format,
            content_hash: original.content_hash,
            size: original.size,
            bit_errors: found.bit_errors,
            registered_at: found.entry.registered_at,
        }
    }
}

/// Response for an analysis
#[derive(Serialize, ToSchema)]
pub struct AnalyzeResponse {
    /// Embedded manifest, null when absent or unreadable
    pub manifest: Option<ManifestSummary>,
    pub watermark: WatermarkSummary,
    /// Matching original, null when the payload is unknown or absent
    pub matched: Option<MatchSummary>,
}

impl From<AnalysisReport> for AnalyzeResponse {
    fn from(report: AnalysisReport) -> Self {
        Self {
            manifest: report.manifest.map(Into::into),
            watermark: WatermarkSummary {
                detected: report.detection.is_some(),
                payload_hex: report.detection.map(|d| d.payload.to_hex()),
                confidence: report.detection.map(|d| d.confidence),
                votes: report.votes,
                windows: report.windows,
            },
            matched: report.matched.map(Into::into),
        }
    }
}

/// Analyze a video
///
/// Accepts multipart/form-data with:
/// - **video** or **file** (required): the video to analyze
///
/// A video without manifest or watermark is not an error: the corresponding
/// fields are null.
#[utoipa::path(
    post,
    path = "/analyze",
    tag = "Analysis",
    request_body(
        content_type = "multipart/form-data",
        description = "Video file to analyze"
    ),
    responses(
        (status = 200, description = "Analysis result", body = AnalyzeResponse),
        (status = 400, description = "Missing or unsupported video"),
        (status = 413, description = "Video too large"),
        (status = 503, description = "Watermark decoding unavailable")
    )
)]
pub async fn analyze_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let fields = MultipartFields::parse(&mut multipart, true, state.max_upload_bytes).await?;
    let asset = fields.into_file()?.into_asset();

    let report = state.analyzer.analyze(&asset).await?;
    Ok(Json(report.into()))
}

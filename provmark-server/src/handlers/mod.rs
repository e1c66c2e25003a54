//! HTTP request handlers
//!
//! This module contains all the request handlers for the API endpoints.

pub mod analyze;
pub mod download;
pub mod health;
pub mod status;
pub mod upload;

use provmark_core::SessionId;

use crate::error::ApiError;

pub use crate::state::AppState;
pub use analyze::{analyze_handler, AnalyzeResponse, ManifestSummary, MatchSummary, WatermarkSummary};
pub use download::download_handler;
pub use health::{health, ready, HealthResponse, ReadyResponse};
pub use status::{status_handler, ProgressResponse, StatusResponse};
pub use upload::{upload_handler, UploadResponse};

/// Parse a session id path segment
pub(crate) fn parse_session_id(raw: &str) -> Result<SessionId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid session id: '{}'", raw)))
}

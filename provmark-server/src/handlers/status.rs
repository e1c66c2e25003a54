//! Session status handler
//!
//! Handles GET /status/{session_id} requests. Reads a snapshot and never
//! waits on the pipeline.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use provmark_core::{Session, SessionStatus};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::handlers::parse_session_id;
use crate::state::AppState;

/// Chunk progress of a processing session
#[derive(Serialize, ToSchema)]
pub struct ProgressResponse {
    /// Chunks embedded so far
    #[schema(example = 4)]
    pub done: usize,
    /// Total chunks in the session
    #[schema(example = 10)]
    pub total: usize,
}

/// Snapshot of a session
#[derive(Serialize, ToSchema)]
pub struct StatusResponse {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub session_id: String,
    /// One of "uploading", "processing", "completed", "failed"
    #[schema(example = "processing")]
    pub status: &'static str,
    /// Failure message, only when failed
    #[schema(example = "Embedding failed for chunk 4 after 4 attempt(s): Watermark call timed out")]
    pub error: Option<String>,
    /// Machine-readable failure code, only when failed
    #[schema(example = "EMBEDDING_FAILED")]
    pub error_code: Option<&'static str>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub progress: ProgressResponse,
    /// Where to fetch the result, only when completed
    #[schema(example = "/download/550e8400-e29b-41d4-a716-446655440000")]
    pub download_url: Option<String>,
}

impl From<Session> for StatusResponse {
    fn from(session: Session) -> Self {
        let download_url = (session.status == SessionStatus::Completed)
            .then(|| format!("/download/{}", session.id));
        Self {
            session_id: session.id.to_string(),
            status: session.status.as_str(),
            error: session.error,
            error_code: session.error_code,
            created_at: session.created_at,
            updated_at: session.updated_at,
            progress: ProgressResponse {
                done: session.progress.done,
                total: session.progress.total,
            },
            download_url,
        }
    }
}

/// Get session status
///
/// Returns the current status of a watermark session with its progress,
/// failure details or download location.
#[utoipa::path(
    get,
    path = "/status/{session_id}",
    tag = "Sessions",
    params(
        ("session_id" = String, Path, description = "Session identifier (UUID)")
    ),
    responses(
        (status = 200, description = "Session snapshot", body = StatusResponse),
        (status = 400, description = "Malformed session id"),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn status_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let id = parse_session_id(&session_id)?;
    let session = state.sessions.status(id)?;
    Ok(Json(session.into()))
}

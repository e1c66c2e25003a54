//! Result download handler
//!
//! Handles GET /download/{session_id} requests for completed sessions.

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;
use crate::handlers::parse_session_id;
use crate::state::AppState;

/// Download the watermarked video
///
/// Returns the signed, watermarked artifact of a completed session as an
/// attachment. Sessions still running answer 409; artifacts released by the
/// retention policy answer 410.
#[utoipa::path(
    get,
    path = "/download/{session_id}",
    tag = "Sessions",
    params(
        ("session_id" = String, Path, description = "Session identifier (UUID)")
    ),
    responses(
        (status = 200, description = "Watermarked video", content_type = "application/octet-stream"),
        (status = 400, description = "Malformed session id"),
        (status = 404, description = "Unknown session"),
        (status = 409, description = "Session not completed"),
        (status = 410, description = "Artifact expired")
    )
)]
pub async fn download_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_session_id(&session_id)?;
    let artifact = state.sessions.result(id).await?;

    tracing::info!(
        session_id = %id,
        size = artifact.data.len(),
        file_name = %artifact.handle.file_name,
        "Artifact downloaded"
    );

    // Header values must be visible ASCII
    let file_name: String = artifact
        .handle
        .file_name
        .chars()
        .filter(|c| (c.is_ascii_graphic() || *c == ' ') && *c != '"')
        .collect();
    let disposition = format!("attachment; filename=\"{}\"", file_name);
    Ok((
        [
            (header::CONTENT_TYPE, artifact.handle.format),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.data,
    )
        .into_response())
}

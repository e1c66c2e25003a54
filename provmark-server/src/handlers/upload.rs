//! Video upload handler
//!
//! Handles POST /upload requests: receives a video, opens a session and
//! starts the watermark pipeline in the background.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use provmark_core::ProvmarkError;
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::multipart::MultipartFields;
use crate::state::AppState;

/// Response for an accepted upload
#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
    /// Identifier used to poll status and download the result
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub session_id: String,
    /// Session status right after the upload ("processing")
    #[schema(example = "processing")]
    pub status: &'static str,
}

/// Upload a video for watermarking
///
/// Accepts multipart/form-data with:
/// - **video** or **file** (required): the video to watermark
/// - **title** (optional): title recorded in the manifest instead of the file name
///
/// The session exists from the moment the upload starts. Once the video is
/// fully received the pipeline runs in the background; poll
/// `GET /status/{session_id}` for progress.
#[utoipa::path(
    post,
    path = "/upload",
    tag = "Sessions",
    request_body(
        content_type = "multipart/form-data",
        description = "Video file with optional title"
    ),
    responses(
        (status = 202, description = "Upload accepted, processing started", body = UploadResponse),
        (status = 400, description = "Missing or unsupported video"),
        (status = 413, description = "Video too large"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let writer = state.sessions.begin_upload();
    let session_id = writer.id();

    let received = async {
        let fields = MultipartFields::parse(&mut multipart, true, state.max_upload_bytes).await?;
        let title = fields
            .get_text("title")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        let asset = fields.into_file()?.into_asset();
        Ok::<_, ApiError>(match title {
            Some(title) => asset.with_file_name(title),
            None => asset,
        })
    }
    .await;

    let asset = match received {
        Ok(asset) => asset,
        Err(e) => {
            let reason = ProvmarkError::InvalidAsset(format!("upload failed: {e}"));
            if let Err(abandon_err) = state.sessions.abandon(writer, &reason) {
                tracing::warn!(session_id = %session_id, error = %abandon_err, "Failed to abandon session");
            }
            return Err(e);
        }
    };

    tracing::info!(
        session_id = %session_id,
        size = asset.len(),
        format = %asset.format,
        "Upload received"
    );
    state.sessions.start(writer, asset)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            session_id: session_id.to_string(),
            status: "processing",
        }),
    ))
}

//! Upload validation module
//!
//! Provides validation utilities for multipart video uploads.

use provmark_core::asset::format_from_extension;
use provmark_core::DEFAULT_VIDEO_MIME;

use crate::error::ApiError;

/// Allowed MIME type categories for video uploads
const ALLOWED_MIME_PREFIXES: &[&str] = &["video/", "application/octet-stream"];

/// Validates the Content-Type of an uploaded file
///
/// Accepts:
/// - video/* (video/mp4, video/webm, video/x-ivf, etc.)
/// - application/octet-stream (binary data)
///
/// Returns an error if the Content-Type is not supported.
pub fn validate_content_type(content_type: Option<&str>) -> Result<(), ApiError> {
    match content_type {
        Some(ct) => {
            let ct_lower = ct.to_lowercase();
            if ALLOWED_MIME_PREFIXES
                .iter()
                .any(|prefix| ct_lower.starts_with(prefix))
            {
                Ok(())
            } else {
                Err(ApiError::bad_request(format!(
                    "Unsupported Content-Type: '{}'. Allowed types: video/*, application/octet-stream",
                    ct
                )))
            }
        }
        // Allow missing Content-Type (treat as binary)
        None => Ok(()),
    }
}

/// Validates the size of an uploaded file
///
/// Returns an error if the file exceeds the maximum size.
pub fn validate_file_size(size: usize, max_size: usize) -> Result<(), ApiError> {
    if size > max_size {
        let max_mb = max_size / (1024 * 1024);
        let actual_mb = size / (1024 * 1024);
        Err(ApiError::payload_too_large(format!(
            "File too large: {} MB exceeds maximum of {} MB",
            actual_mb, max_mb
        )))
    } else {
        Ok(())
    }
}

/// Media format of an upload.
///
/// A specific `video/*` content type wins; generic binary uploads fall back
/// to the file extension, then to [`DEFAULT_VIDEO_MIME`].
pub fn resolve_format(content_type: Option<&str>, file_name: Option<&str>) -> String {
    if let Some(ct) = content_type {
        let essence = ct.split(';').next().unwrap_or(ct).trim().to_lowercase();
        if essence.starts_with("video/") {
            return essence;
        }
    }
    file_name
        .and_then(|name| name.rsplit_once('.'))
        .and_then(|(_, ext)| format_from_extension(&ext.to_lowercase()))
        .unwrap_or(DEFAULT_VIDEO_MIME)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_content_type_video() {
        assert!(validate_content_type(Some("video/mp4")).is_ok());
        assert!(validate_content_type(Some("video/webm")).is_ok());
        assert!(validate_content_type(Some("VIDEO/X-IVF")).is_ok()); // case insensitive
    }

    #[test]
    fn test_validate_content_type_binary() {
        assert!(validate_content_type(Some("application/octet-stream")).is_ok());
    }

    #[test]
    fn test_validate_content_type_none() {
        assert!(validate_content_type(None).is_ok());
    }

    #[test]
    fn test_validate_content_type_rejected() {
        assert!(validate_content_type(Some("text/html")).is_err());
        assert!(validate_content_type(Some("image/jpeg")).is_err());
        assert!(validate_content_type(Some("application/json")).is_err());
    }

    #[test]
    fn test_validate_file_size() {
        let max = 10 * 1024 * 1024; // 10 MB
        assert!(validate_file_size(1024, max).is_ok());
        assert!(validate_file_size(max, max).is_ok()); // exactly max
        let err = validate_file_size(max + 1, max).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_resolve_format() {
        assert_eq!(resolve_format(Some("video/webm"), Some("a.mp4")), "video/webm");
        assert_eq!(
            resolve_format(Some("video/mp4; codecs=avc1"), None),
            "video/mp4"
        );
        assert_eq!(
            resolve_format(Some("application/octet-stream"), Some("clip.ivf")),
            provmark_core::IVF_MIME
        );
        assert_eq!(resolve_format(None, Some("noext")), DEFAULT_VIDEO_MIME);
    }
}

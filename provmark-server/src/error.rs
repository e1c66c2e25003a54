//! API error handling module
//!
//! Provides a unified error type for all API endpoints with structured error variants.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use provmark_core::ProvmarkError;
use thiserror::Error;

/// API error type with structured variants for different error categories
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - client provided invalid input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Payload too large - upload exceeds the configured limit
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Pipeline or session error from provmark-core
    #[error("Provmark error: {0}")]
    Provmark(#[from] ProvmarkError),
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create a payload too large error
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::PayloadTooLarge(message.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Provmark(ref e) => match e {
                ProvmarkError::NotFound(_) => StatusCode::NOT_FOUND,
                ProvmarkError::NotReady { .. } => StatusCode::CONFLICT,
                ProvmarkError::Gone(_) => StatusCode::GONE,
                ProvmarkError::InvalidAsset(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ProvmarkError::DecodeUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,

                // Pipeline and storage failures → 500
                ProvmarkError::EmbeddingFailed { .. }
                | ProvmarkError::ReassemblyFailed(_)
                | ProvmarkError::SigningFailed(_)
                | ProvmarkError::InvalidTransition { .. }
                | ProvmarkError::Storage(_)
                | ProvmarkError::Catalog(_)
                | ProvmarkError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Get the error code for programmatic error handling
    fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            Self::Provmark(ref e) => e.code(),
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            Self::Provmark(ref e) if e.is_client_error() => e.to_string(),
            Self::Provmark(ProvmarkError::DecodeUnavailable(_)) => {
                "Watermark decoding is temporarily unavailable".to_string()
            }
            Self::Provmark(ProvmarkError::Storage(_)) => "Artifact storage error".to_string(),
            Self::Provmark(ProvmarkError::Catalog(_)) => "Catalog error".to_string(),
            Self::Provmark(_) => "Internal processing error".to_string(),
            Self::BadRequest(_) | Self::PayloadTooLarge(_) => self.to_string(),
        }
    }

    /// Get the error category for logging
    fn error_category(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Provmark(_) => "provmark",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        // Log based on severity, always including internal details
        match &self {
            Self::BadRequest(_) | Self::PayloadTooLarge(_) => {
                tracing::warn!(
                    status = %status,
                    category = category,
                    code = code,
                    error = %internal_message,
                    "Client error"
                );
            }
            Self::Provmark(e) if status.is_client_error() => {
                tracing::warn!(
                    status = %status,
                    category = category,
                    code = code,
                    error = %e,
                    "Session query rejected"
                );
            }
            Self::Provmark(_) => {
                tracing::error!(
                    status = %status,
                    category = category,
                    code = code,
                    error = %internal_message,
                    client_message = %client_message,
                    "Provmark error (internal details logged)"
                );
            }
        }

        // All error responses include a `code` field for programmatic error handling
        let body = serde_json::json!({
            "error": client_message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

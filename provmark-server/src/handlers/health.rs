//! Health check handlers
//!
//! Provides health and readiness endpoints for monitoring and orchestration.

use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

/// Health check response
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status: "healthy" or "busy"
    #[schema(example = "healthy")]
    pub status: &'static str,
    /// Server version from Cargo.toml
    #[schema(example = "0.1.0")]
    pub version: &'static str,
    /// Service name
    #[schema(example = "provmark-server")]
    pub service: &'static str,
    /// Active watermark backend ("lsb" or "http")
    #[schema(example = "http")]
    pub watermark_backend: &'static str,
    /// Active manifest engine ("c2pa" or "mock")
    #[schema(example = "c2pa")]
    pub manifest_engine: &'static str,
    /// Concurrent embedding calls allowed on the accelerator
    #[schema(example = 1)]
    pub accelerator_capacity: usize,
    /// Embedding slots currently free
    #[schema(example = 1)]
    pub accelerator_available: usize,
    /// Sessions currently tracked
    #[schema(example = 3)]
    pub sessions: usize,
}

/// Service health
///
/// Returns JSON with service status, version and accelerator occupancy.
/// Used for monitoring and load balancer health checks.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service health", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let accelerator_available = state.gate.available();
    let status = if accelerator_available > 0 {
        "healthy"
    } else {
        "busy"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        service: "provmark-server",
        watermark_backend: state.watermark_backend,
        manifest_engine: state.manifest_engine,
        accelerator_capacity: state.gate.capacity(),
        accelerator_available,
        sessions: state.sessions.len(),
    })
}

/// Readiness response for Kubernetes
#[derive(Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Whether the service is ready to accept traffic
    #[schema(example = true)]
    pub ready: bool,
    /// Optional message explaining status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

/// Kubernetes readiness probe
///
/// Returns 200 if the service is ready to accept traffic.
/// Unlike /health, this is a simple yes/no check.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse)
    )
)]
pub async fn ready() -> Json<ReadyResponse> {
    Json(ReadyResponse {
        ready: true,
        message: None,
    })
}

//! Provmark Server - REST API for video watermarking and provenance
//!
//! Exposes provmark-core sessions via HTTP endpoints:
//! - POST /upload - Start a watermark session for an uploaded video
//! - GET /status/{session_id} - Poll a session
//! - GET /download/{session_id} - Fetch the watermarked, signed video
//! - POST /analyze - Identify a previously watermarked video

use std::net::SocketAddr;
use std::process::ExitCode;

use provmark_server::{create_router_with_state, AppState, Config};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "provmark_core=info,provmark_server=info,tower_http=info";

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_target(true)
        .init();

    let config = Config::from_env();
    let state = match AppState::from_config(&config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize server");
            return ExitCode::FAILURE;
        }
    };

    // Periodic sweep of expired artifacts
    let sessions = state.sessions.clone();
    let interval = config.eviction_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sessions.evict_expired().await;
        }
    });

    let app = create_router_with_state(&config, state);
    let addr = config.socket_addr();

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(%addr, "Provmark server listening");
    tracing::info!("API docs at http://{}/docs", addr);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    match served {
        Ok(()) => {
            tracing::info!("Server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

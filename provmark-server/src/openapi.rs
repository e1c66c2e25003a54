//! OpenAPI documentation configuration
//!
//! Generates OpenAPI 3.0 specification for the Provmark API.

use utoipa::OpenApi;

use crate::handlers::{
    AnalyzeResponse, HealthResponse, ManifestSummary, MatchSummary, ProgressResponse,
    ReadyResponse, StatusResponse, UploadResponse, WatermarkSummary,
};

/// Provmark API - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Provmark API",
        version = "0.1.0",
        description = r#"
## Video Watermarking and Provenance API

Provmark marks uploaded videos with an invisible 96-bit watermark and signs a
**content-provenance manifest** into the result.

### How It Works

1. **Upload** a video via `POST /upload`; a session starts immediately
2. The video is split into keyframe-aligned chunks, each watermarked on a shared accelerator
3. Chunks are reassembled in order and a manifest naming the original is signed in
4. Poll `GET /status/{session_id}` and fetch the result from `GET /download/{session_id}`
5. **Analyze** any video via `POST /analyze` to read its manifest and find its original
"#,
        license(
            name = "MIT OR Apache-2.0",
            url = "https://github.com/provmark/provmark/blob/main/LICENSE"
        )
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development server")
    ),
    tags(
        (name = "Sessions", description = "Upload videos and follow their watermark sessions"),
        (name = "Analysis", description = "Identify previously watermarked videos"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::health::ready,
        crate::handlers::upload::upload_handler,
        crate::handlers::status::status_handler,
        crate::handlers::download::download_handler,
        crate::handlers::analyze::analyze_handler,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            UploadResponse,
            StatusResponse,
            ProgressResponse,
            AnalyzeResponse,
            ManifestSummary,
            WatermarkSummary,
            MatchSummary,
        )
    )
)]
pub struct ApiDoc;

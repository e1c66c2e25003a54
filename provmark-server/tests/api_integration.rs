//! API integration tests for provmark-server.
//!
//! These tests verify the HTTP API behavior with realistic multipart
//! requests, driving whole upload/status/download/analyze flows through the
//! REST endpoints with in-process collaborators.

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use provmark_core::IvfBuilder;
use provmark_server::create_router;
use serde_json::Value;
use tower::ServiceExt;

const BOUNDARY: &str = "----TestBoundary7MA4YWxkTrZu0gW";

/// Helper to create a multipart body with one file field and optional text fields
fn create_multipart(
    field: &str,
    file_name: &str,
    content_type: &str,
    content: &[u8],
    text_fields: &[(&str, &str)],
) -> (String, Vec<u8>) {
    let mut body = Vec::new();

    for (name, value) in text_fields {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
        );
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }

    if !field.is_empty() {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }

    // End boundary
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    (format!("multipart/form-data; boundary={}", BOUNDARY), body)
}

/// A small VP8 IVF stream: 4 chunks of 8 frames
fn test_video() -> Vec<u8> {
    IvfBuilder::synthetic_vp8(32, 8, 220, 42)
}

fn multipart_request(uri: &str, content_type: String, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

/// Upload a video and return the session id
async fn upload(app: &Router, field: &str, file_name: &str, content: &[u8]) -> String {
    let (content_type, body) =
        create_multipart(field, file_name, "application/octet-stream", content, &[]);
    let (status, json) = send_json(app, multipart_request("/upload", content_type, body)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    json["session_id"].as_str().unwrap().to_string()
}

/// Poll status until the session is completed or failed
async fn wait_for_terminal(app: &Router, session_id: &str) -> Value {
    for _ in 0..500 {
        let (status, json) = send_json(app, get_request(&format!("/status/{}", session_id))).await;
        assert_eq!(status, StatusCode::OK);
        if json["status"] == "completed" || json["status"] == "failed" {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {} never finished", session_id);
}

// ============================================================================
// Health & Readiness Tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_router();
    let (status, json) = send_json(&app, get_request("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "provmark-server");
    assert_eq!(json["watermark_backend"], "lsb");
    assert_eq!(json["manifest_engine"], "mock");
    assert_eq!(json["accelerator_capacity"], 1);
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_ready_endpoint() {
    let app = create_router();
    let (status, json) = send_json(&app, get_request("/ready")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ready"], true);
}

#[tokio::test]
async fn test_openapi_document() {
    let app = create_router();
    let (status, json) = send_json(&app, get_request("/api-docs/openapi.json")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["paths"]["/upload"].is_object());
    assert!(json["paths"]["/status/{session_id}"].is_object());
    assert!(json["paths"]["/analyze"].is_object());
}

// ============================================================================
// Session Flow Tests
// ============================================================================

#[tokio::test]
async fn test_upload_status_download_analyze_flow() {
    let app = create_router();
    let session_id = upload(&app, "video", "clip.ivf", &test_video()).await;

    let status = wait_for_terminal(&app, &session_id).await;
    assert_eq!(status["status"], "completed", "unexpected status: {}", status);
    assert_eq!(status["session_id"], session_id.as_str());
    assert!(status["error"].is_null());
    assert_eq!(status["progress"]["done"], 4);
    assert_eq!(status["progress"]["total"], 4);
    let download_url = status["download_url"].as_str().unwrap().to_string();
    assert_eq!(download_url, format!("/download/{}", session_id));

    let response = app.clone().oneshot(get_request(&download_url)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/x-ivf");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"watermarked_clip.ivf\""
    );
    let artifact = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(artifact.len() > test_video().len());

    let (content_type, body) = create_multipart(
        "file",
        "watermarked_clip.ivf",
        "video/x-ivf",
        &artifact,
        &[],
    );
    let (status, json) = send_json(&app, multipart_request("/analyze", content_type, body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["matched"]["session_id"], session_id.as_str());
    assert_eq!(json["matched"]["title"], "clip.ivf");
    assert_eq!(json["matched"]["bit_errors"], 0);
    assert_eq!(json["matched"]["manifest"]["title"], "watermarked_clip.ivf");
    assert_eq!(json["matched"]["manifest"]["ingredients"][0], "clip.ivf");
    assert_eq!(
        json["matched"]["manifest"]["payload_hex"],
        json["watermark"]["payload_hex"]
    );
    assert_eq!(json["watermark"]["detected"], true);
    assert_eq!(json["watermark"]["windows"], 4);
    assert_eq!(json["manifest"]["title"], "watermarked_clip.ivf");
    assert_eq!(json["manifest"]["ingredients"][0], "clip.ivf");
    assert_eq!(
        json["manifest"]["payload_hex"],
        json["watermark"]["payload_hex"]
    );
}

#[tokio::test]
async fn test_title_field_overrides_file_name() {
    let app = create_router();
    let (content_type, body) = create_multipart(
        "video",
        "upload.ivf",
        "application/octet-stream",
        &test_video(),
        &[("title", "evening.ivf")],
    );
    let (status, json) = send_json(&app, multipart_request("/upload", content_type, body)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let session_id = json["session_id"].as_str().unwrap().to_string();
    wait_for_terminal(&app, &session_id).await;

    let response = app
        .clone()
        .oneshot(get_request(&format!("/download/{}", session_id)))
        .await
        .unwrap();
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"watermarked_evening.ivf\""
    );
}

#[tokio::test]
async fn test_unparseable_video_fails_session() {
    let app = create_router();
    let session_id = upload(&app, "video", "clip.ivf", b"definitely not a video stream").await;

    let status = wait_for_terminal(&app, &session_id).await;
    assert_eq!(status["status"], "failed");
    assert_eq!(status["error_code"], "INVALID_ASSET");
    assert!(status["error"].as_str().unwrap().contains("Invalid asset"));
    assert!(status["download_url"].is_null());

    let (status, json) =
        send_json(&app, get_request(&format!("/download/{}", session_id))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "NOT_READY");
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let app = create_router();
    let first = upload(&app, "video", "first.ivf", &test_video()).await;
    let second = upload(&app, "file", "second.ivf", &IvfBuilder::synthetic_vp8(16, 8, 220, 7)).await;
    assert_ne!(first, second);

    let first_status = wait_for_terminal(&app, &first).await;
    let second_status = wait_for_terminal(&app, &second).await;
    assert_eq!(first_status["status"], "completed");
    assert_eq!(second_status["status"], "completed");
    assert_eq!(second_status["progress"]["total"], 2);

    let (_, health) = send_json(&app, get_request("/health")).await;
    assert_eq!(health["sessions"], 2);
}

// ============================================================================
// Error Handling Tests
// ============================================================================

#[tokio::test]
async fn test_status_unknown_session() {
    let app = create_router();
    let (status, json) = send_json(
        &app,
        get_request("/status/550e8400-e29b-41d4-a716-446655440000"),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_status_malformed_session_id() {
    let app = create_router();
    let (status, json) = send_json(&app, get_request("/status/not-a-uuid")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_download_unknown_session() {
    let app = create_router();
    let (status, json) = send_json(
        &app,
        get_request("/download/550e8400-e29b-41d4-a716-446655440000"),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_upload_missing_video() {
    let app = create_router();
    let (content_type, body) = create_multipart("", "", "", &[], &[("title", "nothing")]);
    let (status, json) = send_json(&app, multipart_request("/upload", content_type, body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("No video provided"));
}

#[tokio::test]
async fn test_upload_rejects_non_video_content_type() {
    let app = create_router();
    let (content_type, body) =
        create_multipart("video", "page.html", "text/html", b"<html></html>", &[]);
    let (status, json) = send_json(&app, multipart_request("/upload", content_type, body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("Unsupported Content-Type"));
}

#[tokio::test]
async fn test_analyze_unmarked_video() {
    let app = create_router();
    let (content_type, body) = create_multipart(
        "video",
        "original.ivf",
        "video/x-ivf",
        &test_video(),
        &[],
    );
    let (status, json) = send_json(&app, multipart_request("/analyze", content_type, body)).await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["manifest"].is_null());
    assert!(json["matched"].is_null());
    assert_eq!(json["watermark"]["detected"], false);
    assert_eq!(json["watermark"]["windows"], 4);
}

#[tokio::test]
async fn test_analyze_missing_video() {
    let app = create_router();
    let (content_type, body) = create_multipart("", "", "", &[], &[]);
    let (status, _) = send_json(&app, multipart_request("/analyze", content_type, body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

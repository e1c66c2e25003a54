//! Client for a remote, GPU-backed watermark service.
//!
//! The service exposes two JSON endpoints:
//!
//! - `POST /embed`  `{chunk_index, payload_hex, essence, data}` -> `{data}`
//! - `POST /detect` `{essence, data}` -> `{bits}` (soft bits in `[0, 1]`)
//!
//! Chunk bytes travel base64 encoded. Retries are the dispatcher's job; this
//! client only classifies failures.

use std::ops::Range;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{EmbedRequest, WatermarkDetector, WatermarkEmbedder, WatermarkError};
use crate::payload::Detection;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct HttpWatermarkConfig {
    /// Service base URL, e.g. `http://gpu-node:8080/`.
    pub base_url: Url,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Optional bearer token.
    pub api_key: Option<String>,
}

impl HttpWatermarkConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: DEFAULT_TIMEOUT,
            api_key: None,
        }
    }
}

#[derive(Serialize)]
struct EmbedBody {
    chunk_index: usize,
    payload_hex: String,
    essence: Vec<[usize; 2]>,
    data: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: String,
}

#[derive(Serialize)]
struct DetectBody {
    essence: Vec<[usize; 2]>,
    data: String,
}

#[derive(Deserialize)]
struct DetectResponse {
    bits: Vec<f32>,
}

pub struct HttpWatermarkService {
    client: Client,
    embed_url: Url,
    detect_url: Url,
    api_key: Option<String>,
}

impl HttpWatermarkService {
    pub fn new(config: HttpWatermarkConfig) -> Result<Self, WatermarkError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| WatermarkError::Permanent(format!("Failed to create HTTP client: {e}")))?;
        let join = |path: &str| {
            config
                .base_url
                .join(path)
                .map_err(|e| WatermarkError::Permanent(format!("Invalid service URL: {e}")))
        };
        Ok(Self {
            embed_url: join("embed")?,
            detect_url: join("detect")?,
            client,
            api_key: config.api_key,
        })
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        url: &Url,
        body: &B,
    ) -> Result<R, WatermarkError> {
        let start = Instant::now();
        let mut request = self.client.post(url.clone()).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            let latency_ms = start.elapsed().as_millis() as u64;
            if e.is_timeout() {
                warn!(error = %e, latency_ms, "Watermark service timed out");
                WatermarkError::Timeout
            } else if is_transient_error(&e) {
                warn!(error = %e, latency_ms, "Transient error, will retry");
                WatermarkError::Transient(e.to_string())
            } else {
                warn!(error = %e, latency_ms, "Permanent error, aborting");
                WatermarkError::Permanent(e.to_string())
            }
        })?;

        let status = response.status();
        debug!(status = %status, "Received HTTP response");
        if !status.is_success() {
            let err = format!("watermark service returned status: {status}");
            return if is_transient_status(status) {
                Err(WatermarkError::Transient(err))
            } else {
                Err(WatermarkError::Permanent(err))
            };
        }

        let parsed = response.json::<R>().await.map_err(|e| {
            WatermarkError::Permanent(format!("Failed to parse watermark service response: {e}"))
        })?;
        debug!(
            latency_ms = start.elapsed().as_millis() as u64,
            "Request completed successfully"
        );
        Ok(parsed)
    }
}

fn essence_pairs(essence: &[Range<usize>]) -> Vec<[usize; 2]> {
    essence.iter().map(|r| [r.start, r.end]).collect()
}

#[async_trait]
impl WatermarkEmbedder for HttpWatermarkService {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(level = "debug", skip_all, fields(chunk = request.chunk_index, size = request.data.len()))]
    async fn embed(&self, request: EmbedRequest<'_>) -> Result<Vec<u8>, WatermarkError> {
        let body = EmbedBody {
            chunk_index: request.chunk_index,
            payload_hex: request.payload.to_hex(),
            essence: essence_pairs(request.essence),
            data: STANDARD.encode(request.data),
        };
        let response: EmbedResponse = self.post(&self.embed_url, &body).await?;
        STANDARD
            .decode(response.data)
            .map_err(|e| WatermarkError::Permanent(format!("Invalid base64 from service: {e}")))
    }
}

#[async_trait]
impl WatermarkDetector for HttpWatermarkService {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(level = "debug", skip_all, fields(size = data.len()))]
    async fn detect(
        &self,
        data: &[u8],
        essence: &[Range<usize>],
    ) -> Result<Detection, WatermarkError> {
        let body = DetectBody {
            essence: essence_pairs(essence),
            data: STANDARD.encode(data),
        };
        let response: DetectResponse = self.post(&self.detect_url, &body).await?;
        Detection::from_soft_bits(&response.bits).ok_or_else(|| {
            WatermarkError::Permanent(format!(
                "service returned {} bits, expected {}",
                response.bits.len(),
                crate::payload::PAYLOAD_BITS
            ))
        })
    }
}

/// Check if a reqwest error is transient and should be retried.
pub fn is_transient_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Check if an HTTP status code indicates a transient error.
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::BAD_GATEWAY
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_status_codes() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::GATEWAY_TIMEOUT));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
        assert!(!is_transient_status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn test_endpoints_join_base_url() {
        let config = HttpWatermarkConfig::new(Url::parse("http://gpu:8080/v1/").unwrap());
        let service = HttpWatermarkService::new(config).unwrap();
        assert_eq!(service.embed_url.as_str(), "http://gpu:8080/v1/embed");
        assert_eq!(service.detect_url.as_str(), "http://gpu:8080/v1/detect");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        let mut config = HttpWatermarkConfig::new(Url::parse("http://127.0.0.1:9/").unwrap());
        config.timeout = Duration::from_secs(2);
        let service = HttpWatermarkService::new(config).unwrap();
        let payload = crate::payload::WatermarkPayload::from_bytes([0; 12]);
        let err = service
            .embed(EmbedRequest {
                chunk_index: 0,
                data: &[0; 64],
                essence: &[0..64],
                payload: &payload,
            })
            .await
            .unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
    }

    #[test]
    fn test_essence_pairs() {
        assert_eq!(essence_pairs(&[1..5, 9..12]), vec![[1, 5], [9, 12]]);
    }
}

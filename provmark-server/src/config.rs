//! Server configuration module
//!
//! Handles loading configuration from environment variables with sensible defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use provmark_core::{AnalyzerConfig, ChunkPolicy, DispatchConfig, PayloadMode};

/// Which media toolkit probes and validates uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaToolkitKind {
    /// In-process IVF parser
    Ivf,
    /// External `ffprobe` binary
    Ffprobe,
}

impl FromStr for MediaToolkitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ivf" => Ok(Self::Ivf),
            "ffprobe" | "ffmpeg" => Ok(Self::Ffprobe),
            other => Err(format!("unknown media toolkit '{other}'")),
        }
    }
}

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 3000)
    pub port: u16,
    /// Server host (default: 127.0.0.1)
    pub host: [u8; 4],
    /// Allowed CORS origins, comma-separated (default: allow all in dev)
    pub allowed_origins: Option<Vec<String>>,
    /// Request body limit in MB (default: 512)
    pub body_limit_mb: usize,
    /// Maximum video size per upload in MB (default: 500)
    pub max_upload_mb: usize,
    /// Request timeout in seconds (default: 300)
    pub timeout_secs: u64,
    /// Enable rate limiting (default: false for tests, true when loaded from env)
    pub rate_limit_enabled: bool,
    /// Rate limit: requests per second (default: 10)
    pub rate_limit_per_sec: u64,
    /// Rate limit: burst size (default: 20)
    pub rate_limit_burst: u32,
    /// Base URL of the GPU watermark service
    pub watermark_service_url: Option<String>,
    /// Bearer token sent to the watermark service
    pub watermark_service_api_key: Option<String>,
    /// Allow the in-process LSB watermarker when no service is configured
    pub allow_mock_watermark: bool,
    /// Allow the mock manifest engine when no C2PA credentials are configured
    pub allow_mock_signing: bool,
    pub media_toolkit: MediaToolkitKind,
    /// Concurrent embedding calls across all sessions (default: 1)
    pub accelerator_concurrency: usize,
    pub embed_timeout_secs: u64,
    pub embed_max_retries: u32,
    pub embed_backoff_ms: u64,
    pub signing_timeout_secs: u64,
    /// Frames per chunk (default: 8)
    pub chunk_frames: usize,
    pub payload_mode: PayloadMode,
    pub confidence_threshold: f32,
    pub max_bit_errors: u32,
    /// Artifact lifetime in seconds (default: 24h)
    pub artifact_ttl_secs: u64,
    /// Keep artifacts on disk here instead of in memory
    pub artifact_dir: Option<PathBuf>,
    /// Persist the catalog as JSON here instead of in memory
    pub catalog_path: Option<PathBuf>,
    /// Seconds between expired-artifact sweeps (default: 300)
    pub eviction_interval_secs: u64,
    /// Seconds a failed or evicted session stays queryable (default: 1h)
    pub session_grace_secs: u64,
    /// Organization named as author in manifests
    pub manifest_producer: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            host: [127, 0, 0, 1],
            allowed_origins: None, // None = allow all (dev mode)
            body_limit_mb: 512,
            max_upload_mb: 500,
            timeout_secs: 300,
            rate_limit_enabled: false, // Disabled by default (for tests)
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
            watermark_service_url: None,
            watermark_service_api_key: None,
            allow_mock_watermark: true, // Enabled by default for tests; from_env() defaults to false
            allow_mock_signing: true,   // Enabled by default for tests; from_env() defaults to false
            media_toolkit: MediaToolkitKind::Ivf,
            accelerator_concurrency: 1,
            embed_timeout_secs: 60,
            embed_max_retries: 3,
            embed_backoff_ms: 200,
            signing_timeout_secs: 30,
            chunk_frames: 8,
            payload_mode: PayloadMode::Session,
            confidence_threshold: 0.8,
            max_bit_errors: 10,
            artifact_ttl_secs: 24 * 60 * 60,
            artifact_dir: None,
            catalog_path: None,
            eviction_interval_secs: 300,
            session_grace_secs: 60 * 60,
            manifest_producer: None,
        }
    }
}

/// Parse an environment variable, falling back to `default` when unset or invalid.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(default)
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = std::env::var("HOST")
            .ok()
            .map(|h| {
                if h == "0.0.0.0" {
                    [0, 0, 0, 0]
                } else {
                    [127, 0, 0, 1]
                }
            })
            .unwrap_or(defaults.host);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS").ok().map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        // Rate limiting enabled by default in production, can be disabled with RATE_LIMIT_ENABLED=false
        let rate_limit_enabled = std::env::var("RATE_LIMIT_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            port: env_or("PORT", defaults.port),
            host,
            allowed_origins,
            body_limit_mb: env_or("BODY_LIMIT_MB", defaults.body_limit_mb),
            max_upload_mb: env_or("MAX_UPLOAD_MB", defaults.max_upload_mb),
            timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.timeout_secs),
            rate_limit_enabled,
            rate_limit_per_sec: env_or("RATE_LIMIT_PER_SEC", defaults.rate_limit_per_sec),
            rate_limit_burst: env_or("RATE_LIMIT_BURST", defaults.rate_limit_burst),
            watermark_service_url: env_nonempty("WATERMARK_SERVICE_URL"),
            watermark_service_api_key: env_nonempty("WATERMARK_SERVICE_API_KEY"),
            allow_mock_watermark: env_flag("ALLOW_MOCK_WATERMARK", false),
            allow_mock_signing: env_flag("ALLOW_MOCK_SIGNING", false),
            media_toolkit: env_or("MEDIA_TOOLKIT", defaults.media_toolkit),
            accelerator_concurrency: env_or(
                "ACCELERATOR_CONCURRENCY",
                defaults.accelerator_concurrency,
            ),
            embed_timeout_secs: env_or("EMBED_TIMEOUT_SECS", defaults.embed_timeout_secs),
            embed_max_retries: env_or("EMBED_MAX_RETRIES", defaults.embed_max_retries),
            embed_backoff_ms: env_or("EMBED_BACKOFF_MS", defaults.embed_backoff_ms),
            signing_timeout_secs: env_or("SIGNING_TIMEOUT_SECS", defaults.signing_timeout_secs),
            chunk_frames: env_or("CHUNK_FRAMES", defaults.chunk_frames),
            payload_mode: env_or("PAYLOAD_MODE", defaults.payload_mode),
            confidence_threshold: env_or("CONFIDENCE_THRESHOLD", defaults.confidence_threshold),
            max_bit_errors: env_or("MAX_BIT_ERRORS", defaults.max_bit_errors),
            artifact_ttl_secs: env_or("ARTIFACT_TTL_SECS", defaults.artifact_ttl_secs),
            artifact_dir: env_nonempty("ARTIFACT_DIR").map(PathBuf::from),
            catalog_path: env_nonempty("CATALOG_PATH").map(PathBuf::from),
            eviction_interval_secs: env_or(
                "EVICTION_INTERVAL_SECS",
                defaults.eviction_interval_secs,
            ),
            session_grace_secs: env_or("SESSION_GRACE_SECS", defaults.session_grace_secs),
            manifest_producer: env_nonempty("MANIFEST_PRODUCER"),
        }
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.host, self.port))
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }

    pub fn chunk_policy(&self) -> ChunkPolicy {
        ChunkPolicy::Frames(self.chunk_frames.max(1))
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        let initial_backoff = Duration::from_millis(self.embed_backoff_ms);
        DispatchConfig {
            call_timeout: Duration::from_secs(self.embed_timeout_secs),
            max_retries: self.embed_max_retries,
            initial_backoff,
            max_backoff: initial_backoff.saturating_mul(25),
        }
    }

    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            confidence_threshold: self.confidence_threshold.clamp(0.0, 1.0),
            max_bit_errors: self.max_bit_errors,
        }
    }

    pub fn signing_timeout(&self) -> Duration {
        Duration::from_secs(self.signing_timeout_secs)
    }

    pub fn artifact_ttl(&self) -> Duration {
        Duration::from_secs(self.artifact_ttl_secs)
    }

    pub fn session_grace(&self) -> Duration {
        Duration::from_secs(self.session_grace_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert!(config.allow_mock_watermark);
        assert!(config.allow_mock_signing);
        assert!(!config.rate_limit_enabled);
        assert_eq!(config.chunk_policy(), ChunkPolicy::Frames(8));
        assert_eq!(config.payload_mode, PayloadMode::Session);
        assert_eq!(config.session_grace(), Duration::from_secs(3600));
    }

    #[test]
    fn test_dispatch_config_from_settings() {
        let config = Config {
            embed_timeout_secs: 5,
            embed_max_retries: 2,
            embed_backoff_ms: 100,
            ..Config::default()
        };
        let dispatch = config.dispatch_config();
        assert_eq!(dispatch.call_timeout, Duration::from_secs(5));
        assert_eq!(dispatch.max_retries, 2);
        assert_eq!(dispatch.initial_backoff, Duration::from_millis(100));
        assert_eq!(dispatch.max_backoff, Duration::from_millis(2500));
    }

    #[test]
    fn test_media_toolkit_parsing() {
        assert_eq!("IVF".parse::<MediaToolkitKind>(), Ok(MediaToolkitKind::Ivf));
        assert_eq!(
            "ffprobe".parse::<MediaToolkitKind>(),
            Ok(MediaToolkitKind::Ffprobe)
        );
        assert!("gstreamer".parse::<MediaToolkitKind>().is_err());
    }

    #[test]
    fn test_zero_chunk_frames_is_clamped() {
        let config = Config {
            chunk_frames: 0,
            ..Config::default()
        };
        assert_eq!(config.chunk_policy(), ChunkPolicy::Frames(1));
    }
}

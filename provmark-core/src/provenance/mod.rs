//! Provenance manifests: building, signing, embedding and reading them.
//!
//! The manifest format and its cryptography belong to a [`ManifestEngine`].
//! This module decides *what* goes into the manifest, deterministically from
//! a session's processing record, and runs the engine off the async runtime
//! under a timeout.
//!
//! Engines:
//! - [`MockManifestEngine`] - CBOR trailer with a SHA3 digest, for tests and
//!   development
//! - `C2paManifestEngine` - C2PA manifests signed with an ES256 certificate
//!   (feature `c2pa`)

#[cfg(feature = "c2pa")]
mod c2pa_engine;
mod mock;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::asset::OriginalRef;
use crate::error::{ProvmarkError, Result};
use crate::payload::{PayloadPlan, WatermarkPayload, PAYLOAD_BITS};
use crate::session::SessionId;

#[cfg(feature = "c2pa")]
pub use c2pa_engine::{C2paManifestEngine, CertSigner};
pub use mock::MockManifestEngine;

/// Label of the assertion describing the embedded watermark.
pub const WATERMARK_ASSERTION_LABEL: &str = "provmark.watermark";
pub const ACTIONS_ASSERTION_LABEL: &str = "c2pa.actions";
pub const CREATIVE_WORK_ASSERTION_LABEL: &str = "stds.schema-org.CreativeWork";

const DEFAULT_SIGNING_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Signing rejected: {0}")]
    Rejected(String),

    #[error("Unsupported format for manifests: {0}")]
    Unsupported(String),

    #[error("Invalid manifest: {0}")]
    Invalid(String),

    #[error("Invalid signing credentials: {0}")]
    Credentials(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorInfo {
    pub name: String,
    pub version: String,
}

impl Default for GeneratorInfo {
    fn default() -> Self {
        Self {
            name: "provmark".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

impl std::fmt::Display for GeneratorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

/// Reference from a manifest to a source asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientRef {
    pub title: String,
    pub format: String,
    pub instance_id: String,
    pub relationship: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub label: String,
    pub data: Value,
}

/// What to sign: everything in a manifest except the signature itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestDefinition {
    pub title: String,
    pub format: String,
    pub generator: GeneratorInfo,
    pub producer: Option<String>,
    pub ingredients: Vec<IngredientRef>,
    pub assertions: Vec<Assertion>,
}

impl ManifestDefinition {
    /// The definition as a C2PA manifest definition document.
    pub fn to_c2pa_json(&self) -> Value {
        json!({
            "title": self.title,
            "format": self.format,
            "claim_generator": self.generator.to_string(),
            "claim_generator_info": [{
                "name": self.generator.name,
                "version": self.generator.version,
            }],
            "ingredients": self.ingredients.iter().map(|i| json!({
                "title": i.title,
                "format": i.format,
                "instance_id": i.instance_id,
                "relationship": i.relationship,
            })).collect::<Vec<_>>(),
            "assertions": self.assertions.iter().map(|a| json!({
                "label": a.label,
                "data": a.data,
            })).collect::<Vec<_>>(),
        })
    }
}

/// A signed manifest as read back from an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub title: String,
    pub format: String,
    pub generator: Option<GeneratorInfo>,
    pub producer: Option<String>,
    pub ingredients: Vec<IngredientRef>,
    pub signature_issuer: Option<String>,
    pub signature_time: Option<String>,
    pub assertions: Vec<Assertion>,
}

impl ManifestRecord {
    /// Record for a definition signed by `issuer` at `time`.
    pub fn from_definition(
        definition: &ManifestDefinition,
        issuer: Option<String>,
        time: Option<String>,
    ) -> Self {
        Self {
            title: definition.title.clone(),
            format: definition.format.clone(),
            generator: Some(definition.generator.clone()),
            producer: definition.producer.clone(),
            ingredients: definition.ingredients.clone(),
            signature_issuer: issuer,
            signature_time: time,
            assertions: definition.assertions.clone(),
        }
    }

    pub fn assertion(&self, label: &str) -> Option<&Value> {
        self.assertions
            .iter()
            .find(|a| a.label == label)
            .map(|a| &a.data)
    }

    /// The session payload recorded in the watermark assertion.
    pub fn watermark_payload(&self) -> Option<WatermarkPayload> {
        self.assertion(WATERMARK_ASSERTION_LABEL)?
            .get("payload_hex")?
            .as_str()
            .and_then(|hex| WatermarkPayload::from_hex(hex).ok())
    }
}

/// Author name from a CreativeWork assertion, if any.
pub fn producer_from_assertions(assertions: &[Assertion]) -> Option<String> {
    assertions
        .iter()
        .find(|a| a.label == CREATIVE_WORK_ASSERTION_LABEL)?
        .data
        .get("author")?
        .as_array()?
        .first()?
        .get("name")?
        .as_str()
        .map(str::to_string)
}

/// Signs manifests into assets and reads them back.
///
/// Implementations are synchronous; [`ProvenanceSigner`] runs signing on the
/// blocking pool.
pub trait ManifestEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Sign `definition` and embed it into `asset`.
    fn sign_and_embed(
        &self,
        format: &str,
        asset: &[u8],
        definition: &ManifestDefinition,
    ) -> std::result::Result<Vec<u8>, ManifestError>;

    /// Read the active manifest. `Ok(None)` when the asset carries none.
    fn read(
        &self,
        format: &str,
        asset: &[u8],
    ) -> std::result::Result<Option<ManifestRecord>, ManifestError>;
}

/// The processing history a manifest is built from.
#[derive(Debug, Clone)]
pub struct SigningContext<'a> {
    pub session_id: SessionId,
    pub original: &'a OriginalRef,
    pub plan: &'a PayloadPlan,
    pub chunk_count: usize,
    pub processed_at: DateTime<Utc>,
}

/// Builds manifest definitions and drives a [`ManifestEngine`].
#[derive(Clone)]
pub struct ProvenanceSigner {
    engine: Arc<dyn ManifestEngine>,
    generator: GeneratorInfo,
    producer: Option<String>,
    timeout: Duration,
}

impl ProvenanceSigner {
    pub fn new(engine: Arc<dyn ManifestEngine>) -> Self {
        Self {
            engine,
            generator: GeneratorInfo::default(),
            producer: None,
            timeout: DEFAULT_SIGNING_TIMEOUT,
        }
    }

    pub fn with_generator(mut self, generator: GeneratorInfo) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = Some(producer.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn engine(&self) -> &Arc<dyn ManifestEngine> {
        &self.engine
    }

    /// Build the manifest for a processed session. Same context, same definition.
    pub fn build_definition(&self, ctx: &SigningContext<'_>) -> ManifestDefinition {
        let software_agent = json!({
            "name": self.generator.name,
            "version": self.generator.version,
        });
        let payload = ctx.plan.session_payload();

        let mut assertions = vec![
            Assertion {
                label: ACTIONS_ASSERTION_LABEL.into(),
                data: json!({
                    "actions": [{
                        "action": "c2pa.watermarked",
                        "softwareAgent": software_agent,
                        "when": ctx.processed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                        "parameters": {
                            "ingredient": ctx.original.instance_id(),
                        },
                    }]
                }),
            },
            Assertion {
                label: WATERMARK_ASSERTION_LABEL.into(),
                data: json!({
                    "payload_hex": payload.to_hex(),
                    "payload_bits": PAYLOAD_BITS,
                    "payload_mode": ctx.plan.mode().as_str(),
                    "chunk_count": ctx.chunk_count,
                    "session_id": ctx.session_id.to_string(),
                    "original_hash": ctx.original.content_hash,
                }),
            },
        ];
        if let Some(producer) = &self.producer {
            assertions.push(Assertion {
                label: CREATIVE_WORK_ASSERTION_LABEL.into(),
                data: json!({
                    "@context": "https://schema.org",
                    "@type": "CreativeWork",
                    "author": [{ "@type": "Organization", "name": producer }],
                }),
            });
        }

        ManifestDefinition {
            title: format!("watermarked_{}", ctx.original.title),
            format: ctx.original.format.clone(),
            generator: self.generator.clone(),
            producer: self.producer.clone(),
            ingredients: vec![IngredientRef {
                title: ctx.original.title.clone(),
                format: ctx.original.format.clone(),
                instance_id: ctx.original.instance_id(),
                relationship: "parentOf".into(),
            }],
            assertions,
        }
    }

    /// Sign and embed on the blocking pool. Every failure is `SigningFailed`.
    #[instrument(level = "debug", skip_all, fields(engine = self.engine.name(), size = asset.len()))]
    pub async fn sign(
        &self,
        format: &str,
        asset: Vec<u8>,
        definition: ManifestDefinition,
    ) -> Result<Vec<u8>> {
        let engine = self.engine.clone();
        let format = format.to_string();
        let task = tokio::task::spawn_blocking(move || {
            engine.sign_and_embed(&format, &asset, &definition)
        });

        // A timed-out signer cannot be interrupted; it finishes on its
        // blocking-pool thread and its output is dropped.
        let signed = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Signing timed out");
                return Err(ProvmarkError::SigningFailed(format!(
                    "signing timed out after {}s",
                    self.timeout.as_secs_f32()
                )));
            }
            Ok(Err(join)) => {
                return Err(ProvmarkError::SigningFailed(format!(
                    "signing task failed: {join}"
                )))
            }
            Ok(Ok(result)) => result.map_err(|e| ProvmarkError::SigningFailed(e.to_string()))?,
        };
        debug!(bytes = signed.len(), "Manifest signed and embedded");
        Ok(signed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::VideoAsset;
    use crate::payload::PayloadMode;
    use chrono::TimeZone;

    fn context_parts() -> (SessionId, OriginalRef, PayloadPlan) {
        let id = SessionId::new();
        let asset = VideoAsset::new(b"original video".to_vec(), "video/mp4").with_file_name("clip.mp4");
        let original = OriginalRef::describe(id.to_string(), &asset);
        (id, original, PayloadPlan::new(id, PayloadMode::Session))
    }

    #[test]
    fn test_definition_is_deterministic() {
        let (id, original, plan) = context_parts();
        let signer = ProvenanceSigner::new(Arc::new(MockManifestEngine::new()))
            .with_producer("Newsroom");
        let ctx = SigningContext {
            session_id: id,
            original: &original,
            plan: &plan,
            chunk_count: 10,
            processed_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        };
        assert_eq!(signer.build_definition(&ctx), signer.build_definition(&ctx));
    }

    #[test]
    fn test_definition_contents() {
        let (id, original, plan) = context_parts();
        let signer = ProvenanceSigner::new(Arc::new(MockManifestEngine::new()))
            .with_producer("Newsroom");
        let ctx = SigningContext {
            session_id: id,
            original: &original,
            plan: &plan,
            chunk_count: 10,
            processed_at: Utc::now(),
        };
        let definition = signer.build_definition(&ctx);

        assert_eq!(definition.title, "watermarked_clip.mp4");
        assert_eq!(definition.ingredients.len(), 1);
        assert_eq!(definition.ingredients[0].relationship, "parentOf");
        assert_eq!(definition.ingredients[0].instance_id, original.instance_id());

        let labels: Vec<&str> = definition.assertions.iter().map(|a| a.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                ACTIONS_ASSERTION_LABEL,
                WATERMARK_ASSERTION_LABEL,
                CREATIVE_WORK_ASSERTION_LABEL
            ]
        );

        let record = ManifestRecord::from_definition(&definition, None, None);
        assert_eq!(record.watermark_payload(), Some(plan.session_payload()));
        assert_eq!(
            producer_from_assertions(&record.assertions).as_deref(),
            Some("Newsroom")
        );
        assert_eq!(
            record.assertion(WATERMARK_ASSERTION_LABEL).unwrap()["chunk_count"],
            10
        );
    }

    #[test]
    fn test_c2pa_json_shape() {
        let (id, original, plan) = context_parts();
        let signer = ProvenanceSigner::new(Arc::new(MockManifestEngine::new()));
        let definition = signer.build_definition(&SigningContext {
            session_id: id,
            original: &original,
            plan: &plan,
            chunk_count: 1,
            processed_at: Utc::now(),
        });
        let doc = definition.to_c2pa_json();
        assert_eq!(doc["claim_generator_info"][0]["name"], "provmark");
        assert_eq!(doc["ingredients"][0]["relationship"], "parentOf");
        assert_eq!(doc["assertions"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_signing_is_signing_failed() {
        let (id, original, plan) = context_parts();
        let signer = ProvenanceSigner::new(Arc::new(MockManifestEngine::rejecting()));
        let definition = signer.build_definition(&SigningContext {
            session_id: id,
            original: &original,
            plan: &plan,
            chunk_count: 1,
            processed_at: Utc::now(),
        });
        let err = signer
            .sign("video/mp4", b"asset".to_vec(), definition)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvmarkError::SigningFailed(_)));
    }

    #[tokio::test]
    async fn test_slow_engine_times_out() {
        struct Slow;

        impl ManifestEngine for Slow {
            fn name(&self) -> &'static str {
                "slow"
            }

            fn sign_and_embed(
                &self,
                _format: &str,
                asset: &[u8],
                _definition: &ManifestDefinition,
            ) -> std::result::Result<Vec<u8>, ManifestError> {
                std::thread::sleep(Duration::from_millis(500));
                Ok(asset.to_vec())
            }

            fn read(
                &self,
                _format: &str,
                _asset: &[u8],
            ) -> std::result::Result<Option<ManifestRecord>, ManifestError> {
                Ok(None)
            }
        }

        let (id, original, plan) = context_parts();
        let signer = ProvenanceSigner::new(Arc::new(Slow)).with_timeout(Duration::from_millis(20));
        let definition = signer.build_definition(&SigningContext {
            session_id: id,
            original: &original,
            plan: &plan,
            chunk_count: 1,
            processed_at: Utc::now(),
        });
        let err = signer
            .sign("video/mp4", b"asset".to_vec(), definition)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}

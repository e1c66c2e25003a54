//! Mock manifest engine for testing.
//!
//! Appends `CBOR(envelope) || u32 BE length || MAGIC` to the asset. The
//! envelope carries the manifest record and a SHA3-256 digest of the asset
//! bytes it was appended to. No real signature; never use in production.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use super::{ManifestDefinition, ManifestEngine, ManifestError, ManifestRecord};

const MAGIC: &[u8; 8] = b"PMKMOCK1";
const FOOTER_LEN: usize = 4 + MAGIC.len();
const MOCK_ISSUER: &str = "Provmark Mock Signer";

#[derive(Serialize, Deserialize)]
struct Envelope {
    record: ManifestRecord,
    content_digest: String,
}

#[derive(Debug, Clone, Default)]
pub struct MockManifestEngine {
    reject: bool,
}

impl MockManifestEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine whose credentials are always rejected.
    pub fn rejecting() -> Self {
        Self { reject: true }
    }
}

impl ManifestEngine for MockManifestEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn sign_and_embed(
        &self,
        _format: &str,
        asset: &[u8],
        definition: &ManifestDefinition,
    ) -> Result<Vec<u8>, ManifestError> {
        if self.reject {
            return Err(ManifestError::Rejected(
                "mock signer configured to reject".into(),
            ));
        }

        let envelope = Envelope {
            record: ManifestRecord::from_definition(
                definition,
                Some(MOCK_ISSUER.into()),
                Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            ),
            content_digest: hex::encode(Sha3_256::digest(asset)),
        };
        let mut cbor = Vec::new();
        ciborium::into_writer(&envelope, &mut cbor)
            .map_err(|e| ManifestError::Serialization(e.to_string()))?;
        let len = u32::try_from(cbor.len())
            .map_err(|_| ManifestError::Serialization("manifest too large".into()))?;

        let mut out = Vec::with_capacity(asset.len() + cbor.len() + FOOTER_LEN);
        out.extend_from_slice(asset);
        out.extend_from_slice(&cbor);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(MAGIC);
        Ok(out)
    }

    fn read(&self, _format: &str, asset: &[u8]) -> Result<Option<ManifestRecord>, ManifestError> {
        if asset.len() < FOOTER_LEN || !asset.ends_with(MAGIC) {
            return Ok(None);
        }
        let len_at = asset.len() - FOOTER_LEN;
        let mut len = [0u8; 4];
        len.copy_from_slice(&asset[len_at..len_at + 4]);
        let len = u32::from_be_bytes(len) as usize;
        if len > len_at {
            return Err(ManifestError::Invalid(
                "manifest length exceeds asset".into(),
            ));
        }

        let content = &asset[..len_at - len];
        let envelope: Envelope = ciborium::from_reader(&asset[len_at - len..len_at])
            .map_err(|e| ManifestError::Invalid(format!("unreadable manifest: {e}")))?;
        if envelope.content_digest != hex::encode(Sha3_256::digest(content)) {
            return Err(ManifestError::Invalid(
                "asset content does not match manifest digest".into(),
            ));
        }
        Ok(Some(envelope.record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::{Assertion, GeneratorInfo, IngredientRef};
    use serde_json::json;

    fn definition() -> ManifestDefinition {
        ManifestDefinition {
            title: "watermarked_clip.ivf".into(),
            format: "video/x-ivf".into(),
            generator: GeneratorInfo::default(),
            producer: Some("Newsroom".into()),
            ingredients: vec![IngredientRef {
                title: "clip.ivf".into(),
                format: "video/x-ivf".into(),
                instance_id: "urn:sha3-256:00".into(),
                relationship: "parentOf".into(),
            }],
            assertions: vec![Assertion {
                label: "provmark.watermark".into(),
                data: json!({ "payload_bits": 96, "payload_hex": "00" }),
            }],
        }
    }

    #[test]
    fn test_embed_then_read() {
        let engine = MockManifestEngine::new();
        let signed = engine
            .sign_and_embed("video/x-ivf", b"video bytes", &definition())
            .unwrap();
        assert!(signed.starts_with(b"video bytes"));

        let record = engine.read("video/x-ivf", &signed).unwrap().unwrap();
        assert_eq!(record.title, "watermarked_clip.ivf");
        assert_eq!(record.ingredients, definition().ingredients);
        assert_eq!(record.assertions, definition().assertions);
        assert_eq!(record.signature_issuer.as_deref(), Some(MOCK_ISSUER));
        assert!(record.signature_time.is_some());
    }

    #[test]
    fn test_plain_asset_has_no_manifest() {
        let engine = MockManifestEngine::new();
        assert!(engine.read("video/mp4", b"no manifest here").unwrap().is_none());
        assert!(engine.read("video/mp4", b"").unwrap().is_none());
    }

    #[test]
    fn test_tampered_content_is_invalid() {
        let engine = MockManifestEngine::new();
        let mut signed = engine
            .sign_and_embed("video/x-ivf", b"video bytes", &definition())
            .unwrap();
        signed[0] ^= 0xFF;
        assert!(matches!(
            engine.read("video/x-ivf", &signed),
            Err(ManifestError::Invalid(_))
        ));
    }

    #[test]
    fn test_bogus_length_is_invalid() {
        let mut forged = b"tiny".to_vec();
        forged.extend_from_slice(&u32::MAX.to_be_bytes());
        forged.extend_from_slice(MAGIC);
        assert!(MockManifestEngine::new().read("video/mp4", &forged).is_err());
    }

    #[test]
    fn test_rejecting_engine() {
        let err = MockManifestEngine::rejecting()
            .sign_and_embed("video/mp4", b"x", &definition())
            .unwrap_err();
        assert!(matches!(err, ManifestError::Rejected(_)));
    }
}

//! C2PA manifests signed with an X.509 certificate (ES256).

use std::io::Cursor;
use std::sync::Arc;

use c2pa::{Builder, CallbackSigner, Reader, SigningAlg};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use openssl::x509::X509;
use serde_json::Value;
use zeroize::Zeroizing;

use super::{
    producer_from_assertions, Assertion, GeneratorInfo, IngredientRef, ManifestDefinition,
    ManifestEngine, ManifestError, ManifestRecord,
};

impl From<c2pa::Error> for ManifestError {
    fn from(e: c2pa::Error) -> Self {
        match e {
            c2pa::Error::UnsupportedType => ManifestError::Unsupported(e.to_string()),
            other => ManifestError::Invalid(other.to_string()),
        }
    }
}

impl From<openssl::error::ErrorStack> for ManifestError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        ManifestError::Credentials(e.to_string())
    }
}

/// ECDSA P-256 certificate signer.
pub struct CertSigner {
    private_key: PKey<Private>,
    certificate_chain: Vec<X509>,
}

impl CertSigner {
    /// Create a signer from a PEM private key and a PEM chain (leaf first).
    pub fn from_pem(key_pem: &[u8], cert_chain_pem: &[u8]) -> Result<Self, ManifestError> {
        let private_key = PKey::private_key_from_pem(key_pem)?;
        let certificate_chain = X509::stack_from_pem(cert_chain_pem)?;

        if certificate_chain.is_empty() {
            return Err(ManifestError::Credentials(
                "Certificate chain is empty".into(),
            ));
        }

        Ok(Self {
            private_key,
            certificate_chain,
        })
    }

    /// Load credentials from the environment.
    ///
    /// `C2PA_SIGNING_KEY_PEM` / `C2PA_SIGNING_CERT_PEM` (base64 PEM content)
    /// take precedence over `C2PA_SIGNING_KEY` / `C2PA_SIGNING_CERT` (paths).
    pub fn from_env() -> Result<Self, ManifestError> {
        use base64::{engine::general_purpose::STANDARD, Engine};

        if let (Ok(key_b64), Ok(cert_b64)) = (
            std::env::var("C2PA_SIGNING_KEY_PEM"),
            std::env::var("C2PA_SIGNING_CERT_PEM"),
        ) {
            let key_pem = Zeroizing::new(
                STANDARD
                    .decode(key_b64.trim())
                    .map_err(|e| ManifestError::Credentials(format!("Invalid base64 key: {e}")))?,
            );
            let cert_pem = STANDARD
                .decode(cert_b64.trim())
                .map_err(|e| ManifestError::Credentials(format!("Invalid base64 cert: {e}")))?;
            return Self::from_pem(&key_pem, &cert_pem);
        }

        let key_path = std::env::var("C2PA_SIGNING_KEY")
            .map_err(|_| ManifestError::MissingEnvVar("C2PA_SIGNING_KEY or C2PA_SIGNING_KEY_PEM"))?;
        let cert_path = std::env::var("C2PA_SIGNING_CERT").map_err(|_| {
            ManifestError::MissingEnvVar("C2PA_SIGNING_CERT or C2PA_SIGNING_CERT_PEM")
        })?;
        Self::from_files(key_path, cert_path)
    }

    pub fn from_files(
        key_path: impl AsRef<std::path::Path>,
        cert_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, ManifestError> {
        let key_pem = Zeroizing::new(std::fs::read(key_path)?);
        let cert_pem = std::fs::read(cert_path)?;
        Self::from_pem(&key_pem, &cert_pem)
    }

    /// Sign data using ECDSA P-256 with SHA-256.
    pub fn sign(&self, data: &[u8]) -> c2pa::Result<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.private_key)
            .map_err(|e| c2pa::Error::OtherError(Box::new(e)))?;
        signer
            .update(data)
            .map_err(|e| c2pa::Error::OtherError(Box::new(e)))?;
        signer
            .sign_to_vec()
            .map_err(|e| c2pa::Error::OtherError(Box::new(e)))
    }

    /// The certificate chain as concatenated PEM.
    pub fn pem_chain(&self) -> Result<Vec<u8>, ManifestError> {
        let mut chain = Vec::new();
        for cert in &self.certificate_chain {
            chain.extend_from_slice(&cert.to_pem()?);
        }
        Ok(chain)
    }

    /// Common name of the leaf certificate's subject.
    pub fn subject_common_name(&self) -> Option<String> {
        let leaf = self.certificate_chain.first()?;
        let entry = leaf
            .subject_name()
            .entries_by_nid(openssl::nid::Nid::COMMONNAME)
            .next()?;
        entry.data().as_utf8().ok().map(|s| s.to_string())
    }
}

/// Manifest engine producing standard C2PA manifests.
pub struct C2paManifestEngine {
    signer: Arc<CertSigner>,
}

impl C2paManifestEngine {
    pub fn new(signer: CertSigner) -> Self {
        Self {
            signer: Arc::new(signer),
        }
    }

    pub fn from_env() -> Result<Self, ManifestError> {
        CertSigner::from_env().map(Self::new)
    }
}

impl ManifestEngine for C2paManifestEngine {
    fn name(&self) -> &'static str {
        "c2pa"
    }

    fn sign_and_embed(
        &self,
        format: &str,
        asset: &[u8],
        definition: &ManifestDefinition,
    ) -> Result<Vec<u8>, ManifestError> {
        let manifest_json = serde_json::to_string(&definition.to_c2pa_json())
            .map_err(|e| ManifestError::Serialization(e.to_string()))?;
        let mut builder = Builder::from_json(&manifest_json)?;

        let signer = self.signer.clone();
        let callback_signer = CallbackSigner::new(
            move |_context, data: &[u8]| signer.sign(data),
            SigningAlg::Es256,
            self.signer.pem_chain()?,
        );

        let mut input = Cursor::new(asset);
        let mut output = Cursor::new(Vec::with_capacity(asset.len() + 64 * 1024));
        builder
            .sign(&callback_signer, format, &mut input, &mut output)
            .map_err(|e| ManifestError::Rejected(e.to_string()))?;
        Ok(output.into_inner())
    }

    fn read(&self, format: &str, asset: &[u8]) -> Result<Option<ManifestRecord>, ManifestError> {
        let reader = match Reader::from_stream(format, Cursor::new(asset)) {
            Ok(reader) => reader,
            Err(c2pa::Error::JumbfNotFound)
            | Err(c2pa::Error::ProvenanceMissing)
            | Err(c2pa::Error::UnsupportedType) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        record_from_reader_json(&reader.json())
    }
}

/// Extract the active manifest from a `Reader::json()` report.
fn record_from_reader_json(json: &str) -> Result<Option<ManifestRecord>, ManifestError> {
    let report: Value =
        serde_json::from_str(json).map_err(|e| ManifestError::Serialization(e.to_string()))?;
    let Some(active) = report.get("active_manifest").and_then(Value::as_str) else {
        return Ok(None);
    };
    let Some(manifest) = report.get("manifests").and_then(|m| m.get(active)) else {
        return Ok(None);
    };

    let text = |value: &Value, key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let generator = manifest
        .get("claim_generator_info")
        .and_then(Value::as_array)
        .and_then(|infos| infos.first())
        .map(|info| GeneratorInfo {
            name: text(info, "name").unwrap_or_default(),
            version: text(info, "version").unwrap_or_default(),
        });

    let ingredients = manifest
        .get("ingredients")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|i| IngredientRef {
                    title: text(i, "title").unwrap_or_default(),
                    format: text(i, "format").unwrap_or_default(),
                    instance_id: text(i, "instance_id").unwrap_or_default(),
                    relationship: text(i, "relationship").unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    let assertions: Vec<Assertion> = manifest
        .get("assertions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|a| {
                    Some(Assertion {
                        label: text(a, "label")?,
                        data: a.get("data").cloned().unwrap_or(Value::Null),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let signature = manifest.get("signature_info");
    Ok(Some(ManifestRecord {
        title: text(manifest, "title").unwrap_or_default(),
        format: text(manifest, "format").unwrap_or_default(),
        generator,
        producer: producer_from_assertions(&assertions),
        ingredients,
        signature_issuer: signature.and_then(|s| text(s, "issuer")),
        signature_time: signature.and_then(|s| text(s, "time")),
        assertions,
    }))
}

/// Generate a self-signed certificate for testing purposes.
#[cfg(test)]
fn generate_test_certificate() -> Result<(Vec<u8>, Vec<u8>), ManifestError> {
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::nid::Nid;
    use openssl::x509::extension::{BasicConstraints, KeyUsage};
    use openssl::x509::{X509Builder, X509NameBuilder};

    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let private_key = PKey::from_ec_key(EcKey::generate(&group)?)?;

    let mut x509_builder = X509Builder::new()?;
    x509_builder.set_version(2)?;
    let serial = BigNum::from_u32(1)?.to_asn1_integer()?;
    x509_builder.set_serial_number(&serial)?;

    let mut name_builder = X509NameBuilder::new()?;
    name_builder.append_entry_by_text("C", "US")?;
    name_builder.append_entry_by_text("O", "Provmark Test")?;
    name_builder.append_entry_by_text("CN", "Provmark Test Signer")?;
    let name = name_builder.build();
    x509_builder.set_subject_name(&name)?;
    x509_builder.set_issuer_name(&name)?;
    x509_builder.set_not_before(&Asn1Time::days_from_now(0)?)?;
    x509_builder.set_not_after(&Asn1Time::days_from_now(365)?)?;
    x509_builder.set_pubkey(&private_key)?;
    x509_builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    x509_builder.append_extension(
        KeyUsage::new()
            .critical()
            .key_cert_sign()
            .digital_signature()
            .build()?,
    )?;
    x509_builder.sign(&private_key, MessageDigest::sha256())?;
    let cert = x509_builder.build();

    Ok((private_key.private_key_to_pem_pkcs8()?, cert.to_pem()?))
}

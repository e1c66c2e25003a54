//! Watermark payloads: the identifier carried inside the video.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Sha3_256};

use crate::session::SessionId;

/// Number of bits carried by a payload.
pub const PAYLOAD_BITS: usize = 96;

/// Number of bytes carried by a payload.
pub const PAYLOAD_BYTES: usize = PAYLOAD_BITS / 8;

const DERIVATION_DOMAIN: &[u8] = b"provmark-payload-v1";

/// Fixed-length bit vector embedded into video content.
///
/// Bits are addressed MSB first: bit 0 is the high bit of byte 0.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatermarkPayload([u8; PAYLOAD_BYTES]);

impl WatermarkPayload {
    pub const fn from_bytes(bytes: [u8; PAYLOAD_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PAYLOAD_BYTES] {
        &self.0
    }

    /// Build a payload from exactly [`PAYLOAD_BITS`] booleans.
    pub fn from_bits(bits: &[bool]) -> Option<Self> {
        if bits.len() != PAYLOAD_BITS {
            return None;
        }
        let mut bytes = [0u8; PAYLOAD_BYTES];
        for (i, bit) in bits.iter().enumerate() {
            if *bit {
                bytes[i / 8] |= 0x80 >> (i % 8);
            }
        }
        Some(Self(bytes))
    }

    pub fn bit(&self, index: usize) -> bool {
        self.0[index / 8] & (0x80 >> (index % 8)) != 0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(value: &str) -> Result<Self, PayloadParseError> {
        let bytes = hex::decode(value).map_err(|e| PayloadParseError(e.to_string()))?;
        let bytes: [u8; PAYLOAD_BYTES] = bytes.try_into().map_err(|v: Vec<u8>| {
            PayloadParseError(format!("expected {PAYLOAD_BYTES} bytes, got {}", v.len()))
        })?;
        Ok(Self(bytes))
    }

    /// Number of differing bits.
    pub fn hamming_distance(&self, other: &Self) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    /// Derive a payload from a session id and, for per-chunk payloads, a chunk index.
    pub fn derive(session_id: &SessionId, chunk_index: Option<usize>) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(DERIVATION_DOMAIN);
        hasher.update(session_id.as_bytes());
        if let Some(index) = chunk_index {
            hasher.update((index as u64).to_be_bytes());
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; PAYLOAD_BYTES];
        bytes.copy_from_slice(&digest[..PAYLOAD_BYTES]);
        Self(bytes)
    }
}

impl fmt::Debug for WatermarkPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WatermarkPayload({})", self.to_hex())
    }
}

impl fmt::Display for WatermarkPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for WatermarkPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for WatermarkPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid watermark payload: {0}")]
pub struct PayloadParseError(String);

/// Whether every chunk of a session carries the same payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadMode {
    /// One payload for the whole session.
    #[default]
    Session,
    /// A distinct payload per chunk.
    PerChunk,
}

impl PayloadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::PerChunk => "per_chunk",
        }
    }
}

impl std::str::FromStr for PayloadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "per_chunk" | "per-chunk" | "chunk" => Ok(Self::PerChunk),
            other => Err(format!("unknown payload mode '{other}'")),
        }
    }
}

/// Payload assignment for one session.
#[derive(Debug, Clone)]
pub struct PayloadPlan {
    session_id: SessionId,
    mode: PayloadMode,
    session_payload: WatermarkPayload,
}

impl PayloadPlan {
    pub fn new(session_id: SessionId, mode: PayloadMode) -> Self {
        Self {
            session_payload: WatermarkPayload::derive(&session_id, None),
            session_id,
            mode,
        }
    }

    pub fn mode(&self) -> PayloadMode {
        self.mode
    }

    /// The payload that identifies the session as a whole.
    pub fn session_payload(&self) -> WatermarkPayload {
        self.session_payload
    }

    pub fn payload_for(&self, chunk_index: usize) -> WatermarkPayload {
        match self.mode {
            PayloadMode::Session => self.session_payload,
            PayloadMode::PerChunk => WatermarkPayload::derive(&self.session_id, Some(chunk_index)),
        }
    }

    /// Every distinct payload used for a session of `chunk_count` chunks.
    pub fn all_payloads(&self, chunk_count: usize) -> Vec<WatermarkPayload> {
        match self.mode {
            PayloadMode::Session => vec![self.session_payload],
            PayloadMode::PerChunk => (0..chunk_count).map(|i| self.payload_for(i)).collect(),
        }
    }
}

/// A decoded payload with its confidence in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub payload: WatermarkPayload,
    pub confidence: f32,
}

impl Detection {
    /// A detection that carries no signal.
    pub fn none() -> Self {
        Self {
            payload: WatermarkPayload::from_bytes([0; PAYLOAD_BYTES]),
            confidence: 0.0,
        }
    }

    /// Hard-decide soft bits (`> 0.5` is a one) and score them by mean `|2b - 1|`.
    pub fn from_soft_bits(bits: &[f32]) -> Option<Self> {
        if bits.len() != PAYLOAD_BITS {
            return None;
        }
        let hard: Vec<bool> = bits.iter().map(|b| *b > 0.5).collect();
        let payload = WatermarkPayload::from_bits(&hard)?;
        let confidence = bits
            .iter()
            .map(|b| (2.0 * b.clamp(0.0, 1.0) - 1.0).abs())
            .sum::<f32>()
            / PAYLOAD_BITS as f32;
        Some(Self {
            payload,
            confidence,
        })
    }

    pub fn is_confident(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }
}

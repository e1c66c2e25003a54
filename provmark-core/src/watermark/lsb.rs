//! Keyed least-significant-bit watermarking.
//!
//! Every essence byte carries one payload bit in its LSB, whitened with a
//! keystream so unmarked content decodes to noise. Bits repeat cyclically,
//! and detection takes a per-bit majority vote.

use std::ops::Range;

use async_trait::async_trait;
use sha3::{Digest, Sha3_256};

use super::{EmbedRequest, WatermarkDetector, WatermarkEmbedder, WatermarkError};
use crate::payload::{Detection, PAYLOAD_BITS};

/// Fewest votes per bit for a detection to count.
const MIN_VOTES_PER_BIT: u32 = 8;

#[derive(Debug, Clone)]
pub struct LsbWatermarker {
    key: u64,
}

impl Default for LsbWatermarker {
    fn default() -> Self {
        Self::from_secret(b"provmark-lsb-v1")
    }
}

impl LsbWatermarker {
    pub fn new(key: u64) -> Self {
        Self { key }
    }

    /// Derive the key from arbitrary secret bytes.
    pub fn from_secret(secret: &[u8]) -> Self {
        let digest = Sha3_256::digest(secret);
        let mut key = [0u8; 8];
        key.copy_from_slice(&digest[..8]);
        Self::new(u64::from_be_bytes(key))
    }

    fn keystream_bit(&self, unit: usize, position: usize) -> u8 {
        let word = splitmix64(
            self.key
                .wrapping_add((unit as u64) << 32)
                .wrapping_add((position / 64) as u64),
        );
        ((word >> (position % 64)) & 1) as u8
    }

    /// Visit every essence byte as `(byte offset, payload bit index, keystream bit)`.
    fn for_each_slot(&self, essence: &[Range<usize>], len: usize, mut f: impl FnMut(usize, usize, u8)) {
        let mut k = 0usize;
        for (unit, range) in essence.iter().enumerate() {
            let end = range.end.min(len);
            for (position, offset) in (range.start..end).enumerate() {
                f(offset, k % PAYLOAD_BITS, self.keystream_bit(unit, position));
                k += 1;
            }
        }
    }
}

#[async_trait]
impl WatermarkEmbedder for LsbWatermarker {
    fn name(&self) -> &'static str {
        "lsb"
    }

    async fn embed(&self, request: EmbedRequest<'_>) -> Result<Vec<u8>, WatermarkError> {
        let mut out = request.data.to_vec();
        let len = out.len();
        self.for_each_slot(request.essence, len, |offset, bit, key| {
            let value = request.payload.bit(bit) as u8 ^ key;
            out[offset] = (out[offset] & !1) | value;
        });
        Ok(out)
    }
}

#[async_trait]
impl WatermarkDetector for LsbWatermarker {
    fn name(&self) -> &'static str {
        "lsb"
    }

    async fn detect(
        &self,
        data: &[u8],
        essence: &[Range<usize>],
    ) -> Result<Detection, WatermarkError> {
        let mut ones = [0u32; PAYLOAD_BITS];
        let mut votes = [0u32; PAYLOAD_BITS];
        self.for_each_slot(essence, data.len(), |offset, bit, key| {
            ones[bit] += ((data[offset] & 1) ^ key) as u32;
            votes[bit] += 1;
        });

        if votes.iter().any(|v| *v < MIN_VOTES_PER_BIT) {
            return Ok(Detection::none());
        }
        let soft: Vec<f32> = ones
            .iter()
            .zip(votes.iter())
            .map(|(one, total)| *one as f32 / *total as f32)
            .collect();
        Ok(Detection::from_soft_bits(&soft).unwrap_or_else(Detection::none))
    }
}

fn splitmix64(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

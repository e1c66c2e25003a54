//! Splitting a video into independently embeddable chunks.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::asset::VideoAsset;
use crate::error::{ProvmarkError, Result};
use crate::media::{MediaLayout, MediaToolkit};

/// Target size of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPolicy {
    /// At least this many units (frames or packets) per chunk.
    Frames(usize),
    /// At least this much presentation time per chunk.
    Duration(Duration),
    /// At least this many bytes per chunk.
    Bytes(u64),
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self::Frames(8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    InFlight,
    Done,
    Failed,
}

/// A contiguous slice of the asset.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 0-based, contiguous within a session.
    pub index: usize,
    /// Units of the source layout covered by this chunk.
    pub units: Range<usize>,
    /// Absolute byte range in the source asset.
    pub byte_range: Range<u64>,
    /// Presentation time covered, in milliseconds.
    pub time_range: Range<u64>,
    /// Chunk bytes; source bytes before embedding, embedded bytes after.
    pub data: Vec<u8>,
    /// Byte ranges within `data` a watermark may perturb.
    pub essence: Vec<Range<usize>>,
    pub state: ChunkState,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total number of perturbable bytes.
    pub fn essence_len(&self) -> usize {
        self.essence.iter().map(|r| r.len()).sum()
    }
}

/// An asset's layout together with its chunks.
#[derive(Debug, Clone)]
pub struct ChunkSet {
    pub layout: MediaLayout,
    pub chunks: Vec<Chunk>,
}

/// Compute chunk unit ranges for a layout.
///
/// A chunk is closed before unit `i` once it has reached the policy target
/// and unit `i` is a keyframe (or keyframes are unknown). Deterministic for a
/// given layout and policy.
pub fn plan_chunks(layout: &MediaLayout, policy: ChunkPolicy) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0usize;
    for i in 1..layout.units.len() {
        let reached = match policy {
            ChunkPolicy::Frames(n) => i - start >= n.max(1),
            ChunkPolicy::Duration(target) => {
                let elapsed = layout.units[i]
                    .pts_ms
                    .saturating_sub(layout.units[start].pts_ms);
                elapsed as u128 >= target.as_millis().max(1)
            }
            ChunkPolicy::Bytes(target) => {
                layout.units[i].offset - layout.units[start].offset >= target.max(1)
            }
        };
        let boundary = !layout.keyframes_known || layout.units[i].keyframe;
        if reached && boundary {
            ranges.push(start..i);
            start = i;
        }
    }
    if !layout.units.is_empty() {
        ranges.push(start..layout.units.len());
    }
    ranges
}

/// Probes an asset and cuts it into chunks.
#[derive(Clone)]
pub struct Chunker {
    toolkit: Arc<dyn MediaToolkit>,
    policy: ChunkPolicy,
}

impl Chunker {
    pub fn new(toolkit: Arc<dyn MediaToolkit>, policy: ChunkPolicy) -> Self {
        Self { toolkit, policy }
    }

    pub fn policy(&self) -> ChunkPolicy {
        self.policy
    }

    pub fn toolkit(&self) -> &Arc<dyn MediaToolkit> {
        &self.toolkit
    }

    /// Split `asset` into contiguous chunks that cover it byte for byte.
    ///
    /// # Arguments
    ///
    /// * `asset` - The uploaded video, in a container the toolkit can parse.
    ///
    /// # Errors
    ///
    /// Returns [`ProvmarkError::InvalidAsset`] when the toolkit cannot probe
    /// the asset, when it holds no frames, when a timestamp overflows the
    /// timeline, or when the probed layout does not account for every byte.
    #[instrument(level = "debug", skip_all, fields(toolkit = self.toolkit.name(), size = asset.len()))]
    pub async fn split(&self, asset: &VideoAsset) -> Result<ChunkSet> {
        let layout = self
            .toolkit
            .probe(asset)
            .await
            .map_err(|e| ProvmarkError::InvalidAsset(e.to_string()))?;
        if layout.units.is_empty() {
            return Err(ProvmarkError::InvalidAsset(
                "container holds no frames".into(),
            ));
        }
        layout
            .validate()
            .map_err(|e| ProvmarkError::InvalidAsset(e.to_string()))?;
        if layout.total_len != asset.len() as u64 {
            return Err(ProvmarkError::InvalidAsset(format!(
                "layout describes {} bytes, asset has {}",
                layout.total_len,
                asset.len()
            )));
        }

        let ranges = plan_chunks(&layout, self.policy);
        let last = ranges.len() - 1;
        let chunks = ranges
            .into_iter()
            .enumerate()
            .map(|(index, units)| build_chunk(&layout, &asset.data, index, units, index == last))
            .collect::<Vec<_>>();

        debug!(
            chunks = chunks.len(),
            units = layout.units.len(),
            keyframes_known = layout.keyframes_known,
            "Split asset into chunks"
        );
        Ok(ChunkSet { layout, chunks })
    }
}

fn build_chunk(
    layout: &MediaLayout,
    data: &[u8],
    index: usize,
    units: Range<usize>,
    is_last: bool,
) -> Chunk {
    let first = &layout.units[units.start];
    let final_unit = &layout.units[units.end - 1];

    let start = if index == 0 { 0 } else { first.offset };
    let end = if is_last {
        layout.total_len
    } else {
        final_unit.end()
    };

    let essence = layout.units[units.clone()]
        .iter()
        .filter(|u| !u.essence.is_empty())
        .map(|u| (u.essence.start - start) as usize..(u.essence.end - start) as usize)
        .collect();

    Chunk {
        index,
        time_range: first.pts_ms..final_unit.end_ms().unwrap_or(u64::MAX),
        byte_range: start..end,
        data: data[start as usize..end as usize].to_vec(),
        essence,
        units,
        state: ChunkState::Pending,
    }
}

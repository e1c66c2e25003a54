//! Media demux/mux capability.
//!
//! A toolkit describes a container as a byte-addressed timeline of units
//! (frames or packets). The chunker cuts that timeline, the reassembler asks
//! the toolkit to validate the joined result.

mod ffprobe;
pub mod ivf;

use std::ops::Range;

use async_trait::async_trait;
use thiserror::Error;

use crate::asset::VideoAsset;

pub use ffprobe::FfprobeToolkit;
pub use ivf::{IvfBuilder, IvfToolkit};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Unsupported container: {0}")]
    Unsupported(String),

    #[error("Malformed container: {0}")]
    Malformed(String),

    #[error("Timeline mismatch: {0}")]
    TimelineMismatch(String),

    #[error("Media tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Media tool failed: {message}")]
    ToolFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One frame or packet of the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUnit {
    /// Absolute byte offset of the unit, framing included.
    pub offset: u64,
    /// Byte length of the unit, framing included.
    pub len: u64,
    /// Absolute byte range a watermark may perturb.
    pub essence: Range<u64>,
    /// Presentation time in milliseconds.
    pub pts_ms: u64,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    pub keyframe: bool,
}

impl MediaUnit {
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }

    /// Presentation end time, `None` if the timestamps overflow.
    pub fn end_ms(&self) -> Option<u64> {
        self.pts_ms.checked_add(self.duration_ms)
    }
}

/// Byte-addressed description of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLayout {
    /// Short container name (`ivf`, `mp4`, ...).
    pub container: String,
    /// Total asset length in bytes.
    pub total_len: u64,
    /// Length of the leading container header.
    pub header_len: u64,
    /// Units in byte order, tiling `header_len..trailer_start`.
    pub units: Vec<MediaUnit>,
    /// Whether `MediaUnit::keyframe` carries real information.
    pub keyframes_known: bool,
}

impl MediaLayout {
    /// Start of the trailing bytes that follow the last unit.
    pub fn trailer_start(&self) -> u64 {
        self.units
            .last()
            .map(MediaUnit::end)
            .unwrap_or(self.header_len)
    }

    pub fn trailer_len(&self) -> u64 {
        self.total_len.saturating_sub(self.trailer_start())
    }

    pub fn duration_ms(&self) -> u64 {
        match (self.units.first(), self.units.last()) {
            (Some(first), Some(last)) => last
                .end_ms()
                .unwrap_or(u64::MAX)
                .saturating_sub(first.pts_ms),
            _ => 0,
        }
    }

    /// Check that units tile the asset without gaps or overlaps.
    pub fn validate(&self) -> Result<(), MediaError> {
        let mut cursor = self.header_len;
        for (i, unit) in self.units.iter().enumerate() {
            if unit.offset != cursor {
                return Err(MediaError::Malformed(format!(
                    "unit {i} starts at {} but previous unit ended at {cursor}",
                    unit.offset
                )));
            }
            if unit.essence.start < unit.offset
                || unit.essence.end > unit.end()
                || unit.essence.start > unit.essence.end
            {
                return Err(MediaError::Malformed(format!(
                    "unit {i} essence lies outside the unit"
                )));
            }
            if unit.end_ms().is_none() {
                return Err(MediaError::Malformed(format!(
                    "unit {i} timestamp overflows the timeline"
                )));
            }
            cursor = unit.end();
        }
        if cursor > self.total_len {
            return Err(MediaError::Malformed(format!(
                "units end at {cursor}, past the asset end {}",
                self.total_len
            )));
        }
        Ok(())
    }

    /// Check that `other` has the same timeline: unit sizes, timing,
    /// keyframes, header and trailer.
    pub fn ensure_same_timeline(&self, other: &MediaLayout) -> Result<(), MediaError> {
        if self.units.len() != other.units.len() {
            return Err(MediaError::TimelineMismatch(format!(
                "expected {} units, found {}",
                self.units.len(),
                other.units.len()
            )));
        }
        if self.header_len != other.header_len || self.trailer_len() != other.trailer_len() {
            return Err(MediaError::TimelineMismatch(
                "container header or trailer changed".into(),
            ));
        }
        for (i, (a, b)) in self.units.iter().zip(other.units.iter()).enumerate() {
            if a.offset != b.offset || a.len != b.len {
                return Err(MediaError::TimelineMismatch(format!(
                    "unit {i} moved or changed size"
                )));
            }
            if a.pts_ms != b.pts_ms || a.duration_ms != b.duration_ms {
                return Err(MediaError::TimelineMismatch(format!(
                    "unit {i} timing changed"
                )));
            }
            if a.keyframe != b.keyframe {
                return Err(MediaError::TimelineMismatch(format!(
                    "unit {i} keyframe flag changed"
                )));
            }
        }
        Ok(())
    }
}

/// Demux/mux capability used by the chunker and the reassembler.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Toolkit identifier for logs.
    fn name(&self) -> &'static str;

    /// Describe the container as a byte-addressed unit timeline.
    async fn probe(&self, asset: &VideoAsset) -> Result<MediaLayout, MediaError>;

    /// Validate a joined stream against the source layout and return the
    /// final container bytes.
    async fn mux(
        &self,
        source: &MediaLayout,
        format: &str,
        joined: Vec<u8>,
    ) -> Result<Vec<u8>, MediaError> {
        let candidate = VideoAsset::new(joined, format);
        let layout = self.probe(&candidate).await?;
        source.ensure_same_timeline(&layout)?;
        Ok(candidate.data)
    }
}

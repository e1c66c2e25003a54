//! IVF elementary stream support.
//!
//! IVF is a minimal container: a 32-byte file header followed by frames, each
//! prefixed by a 12-byte header (little-endian size and timestamp).

use async_trait::async_trait;
use tracing::debug;

use super::{MediaError, MediaLayout, MediaToolkit, MediaUnit};
use crate::asset::VideoAsset;

const SIGNATURE: &[u8; 4] = b"DKIF";
const FILE_HEADER_LEN: usize = 32;
const FRAME_HEADER_LEN: usize = 12;

/// Leading bytes of every frame left untouched by watermarking (codec headers).
pub const CODEC_HEADER_GUARD: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfHeader {
    pub fourcc: [u8; 4],
    pub width: u16,
    pub height: u16,
    /// Time base denominator (ticks per second).
    pub rate: u32,
    /// Time base numerator.
    pub scale: u32,
    /// Declared frame count, zero when the writer left it unset.
    pub frame_count: u32,
    pub header_len: usize,
}

impl IvfHeader {
    pub fn parse(data: &[u8]) -> Result<Self, MediaError> {
        if data.len() < FILE_HEADER_LEN {
            return Err(MediaError::Malformed(format!(
                "{} bytes is too short for an IVF header",
                data.len()
            )));
        }
        if &data[0..4] != SIGNATURE {
            return Err(MediaError::Unsupported("missing DKIF signature".into()));
        }
        let header_len = read_u16(data, 6) as usize;
        if header_len < FILE_HEADER_LEN || header_len > data.len() {
            return Err(MediaError::Malformed(format!(
                "invalid header length {header_len}"
            )));
        }
        let rate = read_u32(data, 16);
        let scale = read_u32(data, 20);
        if rate == 0 || scale == 0 {
            return Err(MediaError::Malformed("zero time base".into()));
        }
        let mut fourcc = [0u8; 4];
        fourcc.copy_from_slice(&data[8..12]);
        Ok(Self {
            fourcc,
            width: read_u16(data, 12),
            height: read_u16(data, 14),
            rate,
            scale,
            frame_count: read_u32(data, 24),
            header_len,
        })
    }

    fn ticks_to_ms(&self, ticks: u64) -> Result<u64, MediaError> {
        let ms = (ticks as u128 * self.scale as u128 * 1000) / self.rate as u128;
        u64::try_from(ms).map_err(|_| {
            MediaError::Malformed(format!("timestamp {ticks} does not fit in milliseconds"))
        })
    }

    fn codec(&self) -> Codec {
        match &self.fourcc {
            b"VP80" => Codec::Vp8,
            b"VP90" => Codec::Vp9,
            _ => Codec::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    Vp8,
    Vp9,
    Other,
}

impl Codec {
    fn is_keyframe(self, frame: &[u8]) -> Option<bool> {
        match self {
            // VP8 frame tag: bit 0 is the inverse keyframe flag.
            Codec::Vp8 => Some(frame.first().is_some_and(|b| b & 0x01 == 0)),
            Codec::Vp9 => Some(vp9_is_keyframe(frame)),
            Codec::Other => None,
        }
    }
}

fn vp9_is_keyframe(frame: &[u8]) -> bool {
    let Some(&first) = frame.first() else {
        return false;
    };
    let mut bits = (0..8).rev().map(|shift| (first >> shift) & 1);
    let mut next = || bits.next().unwrap_or(0);

    let frame_marker = (next() << 1) | next();
    if frame_marker != 0b10 {
        return false;
    }
    let profile_low = next();
    let profile_high = next();
    if (profile_high << 1) | profile_low == 3 {
        next();
    }
    let show_existing_frame = next();
    if show_existing_frame == 1 {
        return false;
    }
    next() == 0
}

/// Parse an IVF stream into a unit timeline.
///
/// When the header declares a frame count, exactly that many frames are read
/// and anything after them is the trailer.
pub fn parse_layout(data: &[u8]) -> Result<MediaLayout, MediaError> {
    let header = IvfHeader::parse(data)?;
    let codec = header.codec();
    let declared = header.frame_count as usize;

    let mut offset = header.header_len;
    let mut raw = Vec::new();
    while declared == 0 || raw.len() < declared {
        if offset + FRAME_HEADER_LEN > data.len() {
            break;
        }
        let size = read_u32(data, offset) as usize;
        let pts = read_u64(data, offset + 4);
        let body_start = offset + FRAME_HEADER_LEN;
        let Some(body_end) = body_start.checked_add(size).filter(|end| *end <= data.len()) else {
            if declared == 0 {
                break;
            }
            return Err(MediaError::Malformed(format!(
                "frame {} overruns the stream",
                raw.len()
            )));
        };
        raw.push((offset, size, pts, codec.is_keyframe(&data[body_start..body_end])));
        offset = body_end;
    }

    if declared != 0 && raw.len() < declared {
        return Err(MediaError::Malformed(format!(
            "header declares {declared} frames, found {}",
            raw.len()
        )));
    }

    let tick_ms = header.ticks_to_ms(1)?.max(1);
    let pts_ms = raw
        .iter()
        .map(|(_, _, pts, _)| header.ticks_to_ms(*pts))
        .collect::<Result<Vec<u64>, _>>()?;

    let units = raw
        .iter()
        .enumerate()
        .map(|(i, (offset, size, _, keyframe))| {
            let offset = *offset as u64;
            let body = offset + FRAME_HEADER_LEN as u64;
            let guard = (*size).min(CODEC_HEADER_GUARD) as u64;
            let duration_ms = pts_ms
                .get(i + 1)
                .map(|next| next.saturating_sub(pts_ms[i]))
                .unwrap_or(tick_ms);
            MediaUnit {
                offset,
                len: (FRAME_HEADER_LEN + size) as u64,
                essence: body + guard..body + *size as u64,
                pts_ms: pts_ms[i],
                duration_ms,
                keyframe: keyframe.unwrap_or(i == 0),
            }
        })
        .collect();

    let layout = MediaLayout {
        container: "ivf".into(),
        total_len: data.len() as u64,
        header_len: header.header_len as u64,
        units,
        keyframes_known: codec != Codec::Other,
    };
    layout.validate()?;
    Ok(layout)
}

/// In-process toolkit for IVF (VP8/VP9/AV1) streams.
#[derive(Debug, Clone, Default)]
pub struct IvfToolkit;

impl IvfToolkit {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaToolkit for IvfToolkit {
    fn name(&self) -> &'static str {
        "ivf"
    }

    async fn probe(&self, asset: &VideoAsset) -> Result<MediaLayout, MediaError> {
        let layout = parse_layout(&asset.data)?;
        debug!(
            units = layout.units.len(),
            duration_ms = layout.duration_ms(),
            trailer = layout.trailer_len(),
            "Probed IVF stream"
        );
        Ok(layout)
    }
}

/// Writer for IVF streams.
#[derive(Debug, Clone)]
pub struct IvfBuilder {
    fourcc: [u8; 4],
    width: u16,
    height: u16,
    rate: u32,
    scale: u32,
    frames: Vec<(u64, Vec<u8>)>,
}

impl IvfBuilder {
    pub fn new(fourcc: [u8; 4]) -> Self {
        Self {
            fourcc,
            width: 640,
            height: 360,
            rate: 25,
            scale: 1,
            frames: Vec::new(),
        }
    }

    pub fn with_dimensions(mut self, width: u16, height: u16) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the time base as `rate` ticks per `scale` seconds.
    pub fn with_timebase(mut self, rate: u32, scale: u32) -> Self {
        self.rate = rate;
        self.scale = scale;
        self
    }

    pub fn push_frame(&mut self, pts: u64, data: Vec<u8>) -> &mut Self {
        self.frames.push((pts, data));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let body: usize = self
            .frames
            .iter()
            .map(|(_, f)| FRAME_HEADER_LEN + f.len())
            .sum();
        let mut out = Vec::with_capacity(FILE_HEADER_LEN + body);
        out.extend_from_slice(SIGNATURE);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(FILE_HEADER_LEN as u16).to_le_bytes());
        out.extend_from_slice(&self.fourcc);
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.rate.to_le_bytes());
        out.extend_from_slice(&self.scale.to_le_bytes());
        out.extend_from_slice(&(self.frames.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        for (pts, frame) in &self.frames {
            out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            out.extend_from_slice(&pts.to_le_bytes());
            out.extend_from_slice(frame);
        }
        out
    }

    /// A synthetic VP8 stream of `frames` frames with a keyframe every `gop`
    /// frames. Frame bodies are deterministic noise derived from `seed`.
    pub fn synthetic_vp8(frames: usize, gop: usize, frame_len: usize, seed: u64) -> Vec<u8> {
        let mut builder = Self::new(*b"VP80");
        let mut state = seed | 1;
        for i in 0..frames {
            let keyframe = gop != 0 && i % gop == 0;
            let mut frame: Vec<u8> = (0..frame_len.max(CODEC_HEADER_GUARD))
                .map(|_| {
                    state ^= state << 13;
                    state ^= state >> 7;
                    state ^= state << 17;
                    (state >> 24) as u8
                })
                .collect();
            frame[0] = if keyframe {
                frame[0] & !0x01
            } else {
                frame[0] | 0x01
            };
            if keyframe {
                frame[3..6].copy_from_slice(&[0x9d, 0x01, 0x2a]);
            }
            builder.push_frame(i as u64, frame);
        }
        builder.build()
    }
}

fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_synthetic_stream() {
        let data = IvfBuilder::synthetic_vp8(20, 5, 200, 7);
        let layout = parse_layout(&data).unwrap();

        assert_eq!(layout.container, "ivf");
        assert_eq!(layout.units.len(), 20);
        assert_eq!(layout.header_len, 32);
        assert_eq!(layout.trailer_len(), 0);
        assert!(layout.keyframes_known);
        let keyframes: Vec<usize> = layout
            .units
            .iter()
            .enumerate()
            .filter(|(_, u)| u.keyframe)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(keyframes, vec![0, 5, 10, 15]);
        // 25 fps
        assert_eq!(layout.units[1].pts_ms, 40);
        assert_eq!(layout.duration_ms(), 800);
    }

    #[test]
    fn test_essence_skips_frame_and_codec_headers() {
        let data = IvfBuilder::synthetic_vp8(2, 1, 100, 1);
        let layout = parse_layout(&data).unwrap();
        let unit = &layout.units[0];
        assert_eq!(unit.offset, 32);
        assert_eq!(unit.len, 112);
        assert_eq!(unit.essence, 32 + 12 + 16..32 + 112);
    }

    #[test]
    fn test_declared_count_leaves_trailer() {
        let mut data = IvfBuilder::synthetic_vp8(4, 2, 64, 3);
        data.extend_from_slice(b"trailing manifest bytes");
        let layout = parse_layout(&data).unwrap();
        assert_eq!(layout.units.len(), 4);
        assert_eq!(layout.trailer_len(), 23);
    }

    #[test]
    fn test_truncated_stream_is_malformed() {
        let data = IvfBuilder::synthetic_vp8(4, 2, 64, 3);
        let cut = &data[..data.len() - 10];
        assert!(matches!(parse_layout(cut), Err(MediaError::Malformed(_))));
    }

    #[test]
    fn test_timestamps_past_u64_milliseconds_are_malformed() {
        let mut builder = IvfBuilder::new(*b"VP80").with_timebase(1, 1);
        builder.push_frame(u64::MAX, vec![0; 64]);
        let err = parse_layout(&builder.build()).unwrap_err();
        assert!(matches!(err, MediaError::Malformed(ref m) if m.contains("does not fit")));
    }

    #[test]
    fn test_timeline_end_overflow_is_malformed() {
        let mut builder = IvfBuilder::new(*b"VP80").with_timebase(1000, 1);
        builder.push_frame(0, vec![0; 64]);
        builder.push_frame(u64::MAX, vec![0; 64]);
        let err = parse_layout(&builder.build()).unwrap_err();
        assert!(matches!(err, MediaError::Malformed(ref m) if m.contains("overflows")));
    }

    #[test]
    fn test_rejects_non_ivf() {
        assert!(matches!(
            parse_layout(&[0u8; 64]),
            Err(MediaError::Unsupported(_))
        ));
        assert!(matches!(
            parse_layout(b"DKIF"),
            Err(MediaError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_codec_has_unknown_keyframes() {
        let mut builder = IvfBuilder::new(*b"AV01");
        builder.push_frame(0, vec![0; 40]).push_frame(1, vec![0; 40]);
        let layout = parse_layout(&builder.build()).unwrap();
        assert!(!layout.keyframes_known);
        assert_eq!(layout.units.len(), 2);
    }

    #[test]
    fn test_vp9_keyframe_detection() {
        // frame_marker=10, profile 0, show_existing=0, frame_type=0 (key)
        assert!(vp9_is_keyframe(&[0b1000_0000]));
        // frame_type=1 (inter)
        assert!(!vp9_is_keyframe(&[0b1000_0100]));
        // show_existing_frame=1
        assert!(!vp9_is_keyframe(&[0b1000_1000]));
        // bad frame marker
        assert!(!vp9_is_keyframe(&[0b0000_0000]));
    }

    #[tokio::test]
    async fn test_mux_accepts_identical_timeline() {
        let data = IvfBuilder::synthetic_vp8(6, 3, 80, 11);
        let toolkit = IvfToolkit::new();
        let layout = toolkit
            .probe(&VideoAsset::new(data.clone(), "video/x-ivf"))
            .await
            .unwrap();
        let muxed = toolkit
            .mux(&layout, "video/x-ivf", data.clone())
            .await
            .unwrap();
        assert_eq!(muxed, data);
    }

    #[tokio::test]
    async fn test_mux_rejects_retimed_stream() {
        let data = IvfBuilder::synthetic_vp8(6, 3, 80, 11);
        let toolkit = IvfToolkit::new();
        let layout = parse_layout(&data).unwrap();

        let mut retimed = data.clone();
        // pts of the second frame lives 4 bytes into its frame header
        let second = layout.units[1].offset as usize + 4;
        retimed[second] = 9;
        let result = toolkit.mux(&layout, "video/x-ivf", retimed).await;
        assert!(matches!(result, Err(MediaError::TimelineMismatch(_))));
    }
}

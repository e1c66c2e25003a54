//! Container probing through the `ffprobe` binary.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::{MediaError, MediaLayout, MediaToolkit, MediaUnit};
use crate::asset::{extension_for_format, VideoAsset};

/// Bytes at the start of each video packet kept out of the essence.
const PACKET_HEADER_GUARD: u64 = 16;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    packets: Vec<FfprobePacket>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobePacket {
    codec_type: Option<String>,
    pts_time: Option<String>,
    duration_time: Option<String>,
    size: Option<String>,
    pos: Option<String>,
    flags: Option<String>,
}

/// Media toolkit backed by an external `ffprobe` installation.
#[derive(Debug, Clone)]
pub struct FfprobeToolkit {
    binary: String,
}

impl Default for FfprobeToolkit {
    fn default() -> Self {
        Self {
            binary: "ffprobe".into(),
        }
    }
}

impl FfprobeToolkit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific ffprobe binary.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl MediaToolkit for FfprobeToolkit {
    fn name(&self) -> &'static str {
        "ffprobe"
    }

    async fn probe(&self, asset: &VideoAsset) -> Result<MediaLayout, MediaError> {
        let suffix = format!(".{}", extension_for_format(&asset.format));
        let file = tempfile::Builder::new()
            .prefix("provmark-probe-")
            .suffix(&suffix)
            .tempfile()?;
        tokio::fs::write(file.path(), &asset.data).await?;

        let output = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_packets",
                "-show_format",
            ])
            .arg(file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    MediaError::ToolUnavailable(format!("{} not found", self.binary))
                }
                _ => MediaError::Io(e),
            })?;

        if !output.status.success() {
            return Err(MediaError::ToolFailed {
                message: "ffprobe could not demux the asset".to_string(),
                stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
            });
        }

        let layout = layout_from_probe(&output.stdout, asset.data.len() as u64)?;
        debug!(
            container = %layout.container,
            units = layout.units.len(),
            header = layout.header_len,
            trailer = layout.trailer_len(),
            "Probed container with ffprobe"
        );
        Ok(layout)
    }
}

/// Build a layout from `ffprobe -show_packets -print_format json` output.
///
/// Packets are ordered by file position; each unit spans from its packet to
/// the next one so interleaving bytes stay attached to the preceding packet.
fn layout_from_probe(json: &[u8], total_len: u64) -> Result<MediaLayout, MediaError> {
    let probe: FfprobeOutput = serde_json::from_slice(json)
        .map_err(|e| MediaError::Malformed(format!("unreadable ffprobe output: {e}")))?;

    struct Packet {
        pos: u64,
        size: u64,
        pts_ms: u64,
        duration_ms: u64,
        video: bool,
        keyframe: bool,
    }

    let mut packets: Vec<Packet> = probe
        .packets
        .iter()
        .filter_map(|p| {
            let pos = p.pos.as_deref()?.parse::<u64>().ok()?;
            let size = p.size.as_deref()?.parse::<u64>().ok()?;
            let video = p.codec_type.as_deref() == Some("video");
            Some(Packet {
                pos,
                size,
                pts_ms: seconds_to_ms(p.pts_time.as_deref()),
                duration_ms: seconds_to_ms(p.duration_time.as_deref()),
                video,
                keyframe: video && p.flags.as_deref().is_some_and(|f| f.contains('K')),
            })
        })
        .collect();

    if !packets.iter().any(|p| p.video) {
        return Err(MediaError::Unsupported("no video packets found".into()));
    }
    packets.sort_by_key(|p| p.pos);

    let header_len = packets.first().map(|p| p.pos).unwrap_or(0);
    let mut units = Vec::with_capacity(packets.len());
    for (i, packet) in packets.iter().enumerate() {
        let end = match packets.get(i + 1) {
            Some(next) => next.pos,
            None => packet.pos + packet.size,
        };
        if end < packet.pos + packet.size || end > total_len {
            return Err(MediaError::Malformed(format!(
                "packet at {} overlaps its neighbour or the end of the file",
                packet.pos
            )));
        }
        let essence = if packet.video {
            let guard = packet.size.min(PACKET_HEADER_GUARD);
            packet.pos + guard..packet.pos + packet.size
        } else {
            packet.pos..packet.pos
        };
        units.push(MediaUnit {
            offset: packet.pos,
            len: end - packet.pos,
            essence,
            pts_ms: packet.pts_ms,
            duration_ms: packet.duration_ms,
            keyframe: packet.keyframe,
        });
    }

    let container = probe
        .format
        .and_then(|f| f.format_name)
        .and_then(|name| name.split(',').next().map(str::to_string))
        .unwrap_or_else(|| "unknown".into());

    let layout = MediaLayout {
        container,
        total_len,
        header_len,
        units,
        keyframes_known: true,
    };
    layout.validate()?;
    Ok(layout)
}

fn seconds_to_ms(value: Option<&str>) -> u64 {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .map(|s| (s * 1000.0).round().max(0.0) as u64)
        .unwrap_or(0)
}

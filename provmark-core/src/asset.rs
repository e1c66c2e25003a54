//! Video assets and their identity.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

/// MIME type used for IVF elementary streams.
pub const IVF_MIME: &str = "video/x-ivf";

/// Fallback MIME type when nothing better is known.
pub const DEFAULT_VIDEO_MIME: &str = "video/mp4";

/// A whole video asset held in memory.
#[derive(Debug, Clone)]
pub struct VideoAsset {
    /// Raw container bytes.
    pub data: Vec<u8>,
    /// MIME type (e.g. `video/mp4`).
    pub format: String,
    /// Original file name, if the client supplied one.
    pub file_name: Option<String>,
}

impl VideoAsset {
    pub fn new(data: Vec<u8>, format: impl Into<String>) -> Self {
        Self {
            data,
            format: format.into(),
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Read an asset from disk, deriving the format from the extension.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        let format = format_from_path(path).unwrap_or(DEFAULT_VIDEO_MIME);
        let mut asset = Self::new(data, format);
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            asset.file_name = Some(name.to_string());
        }
        Ok(asset)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// SHA3-256 of the asset bytes, hex encoded.
    pub fn content_hash(&self) -> String {
        content_hash(&self.data)
    }

    /// Title used for manifests: the file name, or a generic one.
    pub fn title(&self) -> String {
        self.file_name
            .clone()
            .unwrap_or_else(|| format!("video.{}", extension_for_format(&self.format)))
    }
}

/// Reference to an original (pre-watermark) asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalRef {
    /// Session that processed the original.
    pub session_id: String,
    /// Title of the original asset.
    pub title: String,
    /// MIME type of the original asset.
    pub format: String,
    /// SHA3-256 of the original bytes, hex encoded.
    pub content_hash: String,
    /// Size of the original in bytes.
    pub size: u64,
}

impl OriginalRef {
    pub fn describe(session_id: impl Into<String>, asset: &VideoAsset) -> Self {
        Self {
            session_id: session_id.into(),
            title: asset.title(),
            format: asset.format.clone(),
            content_hash: asset.content_hash(),
            size: asset.len() as u64,
        }
    }

    /// Ingredient instance identifier derived from the content hash.
    pub fn instance_id(&self) -> String {
        format!("urn:sha3-256:{}", self.content_hash)
    }
}

pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha3_256::digest(data))
}

/// Map a file extension to a video MIME type.
pub fn format_from_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_lowercase();
    format_from_extension(&extension)
}

pub fn format_from_extension(extension: &str) -> Option<&'static str> {
    let format = match extension {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "ivf" => IVF_MIME,
        _ => return None,
    };
    Some(format)
}

pub fn extension_for_format(format: &str) -> &'static str {
    match format {
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        "video/x-matroska" => "mkv",
        "video/x-msvideo" => "avi",
        IVF_MIME => "ivf",
        _ => "mp4",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        assert_eq!(format_from_path(Path::new("clip.MP4")), Some("video/mp4"));
        assert_eq!(format_from_path(Path::new("clip.ivf")), Some(IVF_MIME));
        assert_eq!(format_from_path(Path::new("clip.mov")), Some("video/quicktime"));
        assert_eq!(format_from_path(Path::new("clip.txt")), None);
        assert_eq!(format_from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_extension_round_trips_known_formats() {
        for ext in ["mp4", "mov", "webm", "mkv", "avi", "ivf"] {
            let format = format_from_extension(ext).unwrap();
            assert_eq!(extension_for_format(format), ext);
        }
    }

    #[test]
    fn test_title_falls_back_to_format() {
        let asset = VideoAsset::new(vec![1, 2, 3], IVF_MIME);
        assert_eq!(asset.title(), "video.ivf");
        let named = asset.with_file_name("holiday.ivf");
        assert_eq!(named.title(), "holiday.ivf");
    }

    #[test]
    fn test_original_ref_instance_id() {
        let asset = VideoAsset::new(b"original".to_vec(), "video/mp4");
        let original = OriginalRef::describe("s-1", &asset);
        assert_eq!(original.size, 8);
        assert_eq!(original.content_hash.len(), 64);
        assert!(original.instance_id().starts_with("urn:sha3-256:"));
    }
}

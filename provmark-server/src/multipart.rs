//! Multipart form parsing helpers
//!
//! Provides reusable abstractions for parsing multipart/form-data video
//! uploads shared by the upload and analyze handlers.

use std::collections::HashMap;

use axum::extract::Multipart;
use provmark_core::VideoAsset;

use crate::error::ApiError;
use crate::validation::{resolve_format, validate_content_type, validate_file_size};

/// Field names accepted for the uploaded video
const FILE_FIELDS: &[&str] = &["video", "file"];

/// Represents a file uploaded via multipart form
#[derive(Debug, Clone)]
pub struct FileField {
    /// File data bytes
    pub data: Vec<u8>,
    /// Content-Type from the multipart field (if provided)
    pub content_type: Option<String>,
    /// Original filename from the multipart field (if provided)
    pub file_name: Option<String>,
}

impl FileField {
    /// Convert into a [`VideoAsset`], resolving its media format.
    pub fn into_asset(self) -> VideoAsset {
        let format = resolve_format(self.content_type.as_deref(), self.file_name.as_deref());
        let asset = VideoAsset::new(self.data, format);
        match self.file_name {
            Some(name) if !name.is_empty() => asset.with_file_name(name),
            _ => asset,
        }
    }
}

/// Parsed multipart form fields
///
/// Provides structured access to the video and text fields from a
/// multipart/form-data request.
#[derive(Debug)]
pub struct MultipartFields {
    /// Video field (named "video" or "file")
    file: Option<FileField>,
    /// Text fields indexed by name
    text_fields: HashMap<String, String>,
}

impl MultipartFields {
    /// Parse all fields from a multipart request
    ///
    /// The video is read chunk by chunk so an oversized upload is rejected
    /// as soon as it crosses `max_file_size`.
    ///
    /// # Example
    /// ```ignore
    /// let fields = MultipartFields::parse(&mut multipart, true, state.max_upload_bytes).await?;
    /// let asset = fields.into_file()?.into_asset();
    /// ```
    pub async fn parse(
        multipart: &mut Multipart,
        validate_content_type_flag: bool,
        max_file_size: usize,
    ) -> Result<Self, ApiError> {
        let mut file: Option<FileField> = None;
        let mut text_fields = HashMap::new();

        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to parse multipart: {}", e)))?
        {
            let name = field.name().unwrap_or("").to_string();

            if FILE_FIELDS.contains(&name.as_str()) {
                if file.is_some() {
                    return Err(ApiError::bad_request("Only one video per request is accepted"));
                }
                let content_type = field.content_type().map(|s| s.to_string());
                let file_name = field.file_name().map(|s| s.to_string());

                if validate_content_type_flag {
                    validate_content_type(content_type.as_deref())?;
                }

                let mut data = Vec::new();
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file: {}", e)))?
                {
                    validate_file_size(data.len() + chunk.len(), max_file_size)?;
                    data.extend_from_slice(&chunk);
                }

                file = Some(FileField {
                    data,
                    content_type,
                    file_name,
                });
            } else {
                let value = field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read field '{}': {}", name, e))
                })?;
                text_fields.insert(name, value);
            }
        }

        Ok(Self { file, text_fields })
    }

    /// Take the video field (required)
    ///
    /// Returns an error if no video was uploaded or it is empty.
    pub fn into_file(self) -> Result<FileField, ApiError> {
        let file = self.file.ok_or_else(|| {
            ApiError::bad_request("No video provided. Use 'video' or 'file' field in multipart form.")
        })?;
        if file.data.is_empty() {
            return Err(ApiError::bad_request("Uploaded video is empty"));
        }
        Ok(file)
    }

    /// Get a text field value
    ///
    /// Returns `None` if the field is not present.
    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.text_fields.get(name).map(|s| s.as_str())
    }
}

use actix_multipart::Multipart;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::{StreamExt, TryStreamExt};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::config::UploadConfig;

/// Multipart field carrying the scan.
pub const FILE_FIELD: &str = "file";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No image was uploaded")]
    Missing,
    #[error("Unsupported file type '{0}', expected one of: {1}")]
    UnsupportedExtension(String, String),
    #[error("Upload exceeds the {0} byte limit")]
    TooLarge(usize),
    #[error("Image data is not valid base64: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),
    #[error("Malformed multipart upload: {0}")]
    Multipart(String),
}

/// Raw upload bytes owned by a single request.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    pub file_name: Option<String>,
}

impl UploadedImage {
    pub fn sha256(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        hex::encode(hasher.finalize())
    }

    pub fn display_name(&self) -> &str {
        self.file_name.as_deref().unwrap_or("upload")
    }
}

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    max_bytes: usize,
    allowed_extensions: Vec<String>,
}

impl UploadPolicy {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Comma separated list for the file input's `accept` attribute.
    pub fn accept_attribute(&self) -> String {
        self.allowed_extensions
            .iter()
            .map(|ext| format!(".{}", ext))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// The extension is only a hint; content is checked when decoding.
    pub fn check_file_name(&self, file_name: Option<&str>) -> Result<(), UploadError> {
        let Some(file_name) = file_name.filter(|name| !name.is_empty()) else {
            return Ok(());
        };
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if self.allowed_extensions.iter().any(|allowed| *allowed == extension) {
            Ok(())
        } else {
            Err(UploadError::UnsupportedExtension(
                extension,
                self.allowed_extensions.join(", "),
            ))
        }
    }

    pub fn check_size(&self, len: usize) -> Result<(), UploadError> {
        if len > self.max_bytes {
            return Err(UploadError::TooLarge(self.max_bytes));
        }
        Ok(())
    }

    pub fn validate(&self, image: &UploadedImage) -> Result<(), UploadError> {
        if image.bytes.is_empty() {
            return Err(UploadError::Missing);
        }
        self.check_size(image.bytes.len())?;
        self.check_file_name(image.file_name.as_deref())
    }

    /// Reads the `file` field of a multipart form, ignoring any other fields.
    pub async fn read_multipart(&self, mut payload: Multipart) -> Result<UploadedImage, UploadError> {
        let mut upload = None;

        while let Some(mut field) = payload
            .try_next()
            .await
            .map_err(|e| UploadError::Multipart(e.to_string()))?
        {
            if field.name() != Some(FILE_FIELD) || upload.is_some() {
                while let Some(chunk) = field.next().await {
                    chunk.map_err(|e| UploadError::Multipart(e.to_string()))?;
                }
                continue;
            }

            let file_name = field
                .content_disposition()
                .and_then(|cd| cd.get_filename())
                .map(str::to_string);
            self.check_file_name(file_name.as_deref())?;

            let mut bytes = Vec::new();
            while let Some(chunk) = field.next().await {
                let data = chunk.map_err(|e| UploadError::Multipart(e.to_string()))?;
                self.check_size(bytes.len() + data.len())?;
                bytes.extend_from_slice(&data);
            }
            upload = Some(UploadedImage { bytes, file_name });
        }

        let image = upload.ok_or(UploadError::Missing)?;
        self.validate(&image)?;
        Ok(image)
    }

    /// Decodes the JSON API payload: plain base64 or a `data:image/...;base64,` URL.
    pub fn from_base64(&self, image_data: &str, file_name: Option<String>) -> Result<UploadedImage, UploadError> {
        let encoded = match image_data.split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => image_data,
        };
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(UploadError::Missing);
        }
        // Base64 inflates by 4/3, so oversized payloads can be rejected before decoding.
        self.check_size(encoded.len() / 4 * 3)?;
        let image = UploadedImage {
            bytes: STANDARD.decode(encoded)?,
            file_name,
        };
        self.validate(&image)?;
        Ok(image)
    }
}

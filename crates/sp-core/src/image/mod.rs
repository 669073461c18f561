//! Image payload handed to the chat provider and the image host.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::host::ImageFile;

const FALLBACK_MIME_TYPE: &str = "image/jpeg";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("Empty image buffer")]
    Empty,
}

/// Content identity of an image. Two payloads with the same data share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageKey(String);

impl ImageKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form is enough to correlate log lines.
        let short: String = self.0.chars().take(12).collect();
        f.write_str(&short)
    }
}

/// Base64 image data plus its MIME type.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePayload {
    pub base64: String,
    pub mime_type: String,
}

impl ImagePayload {
    pub fn new(base64: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            base64: base64.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Encode raw image bytes, sniffing the MIME type from the header.
    ///
    /// Unknown formats are labelled `image/jpeg`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }

        let mime_type = image::guess_format(bytes)
            .map(|format| format.to_mime_type())
            .unwrap_or(FALLBACK_MIME_TYPE);

        Ok(Self::new(general_purpose::STANDARD.encode(bytes), mime_type))
    }

    pub fn key(&self) -> ImageKey {
        ImageKey(hex::encode(blake3::hash(self.base64.as_bytes()).as_bytes()))
    }

    pub fn is_empty(&self) -> bool {
        self.base64.is_empty()
    }
}

impl From<ImageFile> for ImagePayload {
    fn from(file: ImageFile) -> Self {
        Self::new(file.base64, file.mime_type)
    }
}

impl std::fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime_type", &self.mime_type)
            .field("base64_len", &self.base64.len())
            .finish()
    }
}

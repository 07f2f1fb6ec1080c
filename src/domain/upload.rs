//! The file a user picked or dropped, and the checks it must pass before
//! anything goes over the network.

use std::path::Path;

use crate::domain::outcome::InvalidInput;

/// Accepted media type prefix.
pub const IMAGE_MEDIA_PREFIX: &str = "image/";

/// A file selected for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    file_name: String,
    declared_media_type: Option<String>,
    bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            declared_media_type: None,
            bytes: bytes.into(),
        }
    }

    /// Use the media type the picker or drop event reported instead of
    /// guessing from the extension.
    #[must_use]
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.declared_media_type = Some(media_type.into());
        self
    }

    /// Read a file from disk. The media type is guessed from its extension.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map_or_else(|| "upload".to_string(), |name| name.to_string_lossy().into_owned());
        Ok(Self::new(file_name, bytes))
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Declared media type, falling back to the extension guess.
    #[must_use]
    pub fn media_type(&self) -> Option<&str> {
        self.declared_media_type
            .as_deref()
            .or_else(|| guess_media_type(&self.file_name))
    }

    #[must_use]
    pub fn is_image(&self) -> bool {
        self.media_type()
            .is_some_and(|media_type| media_type.to_ascii_lowercase().starts_with(IMAGE_MEDIA_PREFIX))
    }

    /// Type check first, then emptiness, then size.
    pub fn validate(&self, max_bytes: u64) -> Result<(), InvalidInput> {
        if !self.is_image() {
            return Err(InvalidInput::NotAnImage {
                media_type: self.media_type().map(str::to_string),
            });
        }
        if self.is_empty() {
            return Err(InvalidInput::Empty);
        }
        if self.len() > max_bytes {
            return Err(InvalidInput::TooLarge {
                size: self.len(),
                limit: max_bytes,
            });
        }
        Ok(())
    }
}

/// Media type for common image extensions. Anything else is unknown.
#[must_use]
pub fn guess_media_type(file_name: &str) -> Option<&'static str> {
    let extension = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    let media_type = match extension.as_str() {
        "jpg" | "jpeg" | "jfif" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "avif" => "image/avif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "json" => "application/json",
        "zip" => "application/zip",
        _ => return None,
    };
    Some(media_type)
}

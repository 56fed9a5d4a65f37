//! Image normalization.
//!
//! Downloaded covers and chapter pages are handed to an [`ImageStore`], which
//! turns raw bytes into a reference the caller can use directly.

use base64::Engine;

/// Errors raised while storing an image
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Empty image body from {0}")]
    Empty(String),

    #[error("Not an image ({content_type}) from {url}")]
    NotAnImage { url: String, content_type: String },
}

/// Normalizes raw image bytes into a caller-usable reference.
pub trait ImageStore: Send + Sync + std::fmt::Debug {
    fn store(
        &self,
        data: &[u8],
        content_type: Option<&str>,
        source_url: &str,
    ) -> Result<String, ImageError>;
}

/// Stores images inline as `data:` URLs
#[derive(Debug, Default, Clone)]
pub struct DataUrlStore;

impl ImageStore for DataUrlStore {
    fn store(
        &self,
        data: &[u8],
        content_type: Option<&str>,
        source_url: &str,
    ) -> Result<String, ImageError> {
        if data.is_empty() {
            return Err(ImageError::Empty(source_url.to_string()));
        }

        let declared = content_type
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase())
            .filter(|ct| ct.starts_with("image/"));

        let mime = match declared.or_else(|| sniff_mime(data).map(str::to_string)) {
            Some(mime) => mime,
            None => {
                return Err(ImageError::NotAnImage {
                    url: source_url.to_string(),
                    content_type: content_type.unwrap_or("unknown").to_string(),
                })
            }
        };

        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
        Ok(format!("data:{};base64,{}", mime, encoded))
    }
}

/// Guess an image mime type from its magic bytes
pub fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("image/png")
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if data.starts_with(b"GIF8") {
        Some("image/gif")
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        Some("image/webp")
    } else if data.len() >= 12 && &data[4..8] == b"ftyp" && &data[8..12] == b"avif" {
        Some("image/avif")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(PNG), Some("image/png"));
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_mime(b"GIF89a"), Some("image/gif"));
        assert_eq!(sniff_mime(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_mime(b"<html>"), None);
    }

    #[test]
    fn test_data_url_uses_declared_type() {
        let store = DataUrlStore;
        let url = store
            .store(&[1, 2, 3], Some("image/webp; charset=binary"), "u")
            .unwrap();
        assert_eq!(url, "data:image/webp;base64,AQID");
    }

    #[test]
    fn test_data_url_sniffs_when_type_missing() {
        let store = DataUrlStore;
        let url = store.store(PNG, Some("application/octet-stream"), "u").unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_rejects_non_images() {
        let store = DataUrlStore;
        assert!(matches!(
            store.store(b"<html></html>", Some("text/html"), "u"),
            Err(ImageError::NotAnImage { .. })
        ));
        assert!(matches!(
            store.store(&[], None, "u"),
            Err(ImageError::Empty(_))
        ));
    }
}

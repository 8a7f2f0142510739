//! Text extraction from uploaded bytes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use caseforge_core::{Error, Result, TextExtractor};

/// Formats decoded by [`PlainTextExtractor`], as extensions or MIME types.
const PLAIN_TEXT_FORMATS: &[&str] = &[
    "txt",
    "text",
    "md",
    "markdown",
    "text/plain",
    "text/markdown",
    "text/x-markdown",
];

/// Lowercase `format` and strip a leading dot and any MIME parameters.
fn normalize_format(format: &str) -> String {
    let format = format.split(';').next().unwrap_or_default().trim();
    format.trim_start_matches('.').to_lowercase()
}

/// Decodes plain text and markdown.
///
/// Bytes are read as UTF-8 with lossy conversion for invalid sequences; a
/// leading byte-order mark is dropped.
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    fn supports(&self, format: &str) -> bool {
        PLAIN_TEXT_FORMATS.contains(&normalize_format(format).as_str())
    }

    async fn extract(&self, bytes: &[u8], format: &str) -> Result<String> {
        if !self.supports(format) {
            return Err(Error::UnsupportedFormat(format.to_string()));
        }
        let text = String::from_utf8_lossy(bytes);
        let text = text.strip_prefix('\u{FEFF}').unwrap_or(&text).to_string();
        debug!(
            format,
            byte_size = bytes.len(),
            char_count = text.chars().count(),
            "Extracted plain text"
        );
        Ok(text)
    }
}

/// Ordered set of extractors. The first one supporting a format wins.
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn TextExtractor>>,
}

impl ExtractorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// Register an extractor after the existing ones.
    pub fn register(&mut self, extractor: Arc<dyn TextExtractor>) {
        self.extractors.push(extractor);
    }

    /// Whether any registered extractor decodes `format`.
    pub fn supports(&self, format: &str) -> bool {
        self.extractors.iter().any(|e| e.supports(format))
    }

    /// Decode `bytes` with the first extractor supporting `format`.
    pub async fn extract(&self, bytes: &[u8], format: &str) -> Result<String> {
        let extractor = self
            .extractors
            .iter()
            .find(|e| e.supports(format))
            .ok_or_else(|| Error::UnsupportedFormat(format.to_string()))?;
        extractor.extract(bytes, format).await
    }
}

impl Default for ExtractorRegistry {
    /// Registry with [`PlainTextExtractor`] installed.
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PlainTextExtractor));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_formats() {
        let extractor = PlainTextExtractor;
        assert!(extractor.supports("txt"));
        assert!(extractor.supports(".MD"));
        assert!(extractor.supports("markdown"));
        assert!(extractor.supports("text/plain; charset=utf-8"));
        assert!(!extractor.supports("pdf"));
        assert!(!extractor.supports("application/vnd.openxmlformats-officedocument.wordprocessingml.document"));
    }

    #[tokio::test]
    async fn test_extract_plain_text() {
        let text = PlainTextExtractor
            .extract(b"Refunds are issued within 30 days.", "txt")
            .await
            .unwrap();
        assert_eq!(text, "Refunds are issued within 30 days.");
    }

    #[tokio::test]
    async fn test_extract_strips_bom() {
        let text = PlainTextExtractor
            .extract("\u{FEFF}# Policy".as_bytes(), "md")
            .await
            .unwrap();
        assert_eq!(text, "# Policy");
    }

    #[tokio::test]
    async fn test_extract_invalid_utf8_is_lossy() {
        let text = PlainTextExtractor
            .extract(&[0xFF, 0xFE, b'h', b'i'], "txt")
            .await
            .unwrap();
        assert!(text.contains("hi"));
        assert!(text.contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_unsupported_format() {
        let err = PlainTextExtractor.extract(b"%PDF-1.7", "pdf").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(ref f) if f == "pdf"));
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let registry = ExtractorRegistry::default();
        assert!(registry.supports("text/markdown"));
        assert_eq!(registry.extract(b"hello", "text").await.unwrap(), "hello");
        assert!(matches!(
            registry.extract(b"x", "docx").await,
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_registry_rejects_everything() {
        let registry = ExtractorRegistry::new();
        assert!(!registry.supports("txt"));
        assert!(registry.extract(b"x", "txt").await.is_err());
    }
}

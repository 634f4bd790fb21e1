/// Text extraction for uploaded documents
///
/// Plain text is decoded in-process; PDF and DOCX bytes go to the external
/// extractor service. The trait is the seam tests mock.
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("extraction failed: {0}")]
    Failed(String),

    #[error("extractor timeout")]
    Timeout,

    #[error("unsupported document: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, ExtractError>;

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract plain text from document bytes.
    async fn extract(&self, filename: &str, mime: &str, data: Bytes) -> Result<String>;
}

/// Client for the external extractor service. Expects a plain POST of the
/// document bytes and a text/plain response body.
pub struct HttpExtractor {
    http: reqwest::Client,
    base_url: String,
}

impl HttpExtractor {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ExtractError::Failed(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl TextExtractor for HttpExtractor {
    async fn extract(&self, filename: &str, mime: &str, data: Bytes) -> Result<String> {
        // UTF-8 text never needs the round trip.
        if mime == "text/plain" {
            return decode_plain_text(&data);
        }

        let response = self
            .http
            .post(format!("{}/extract", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, mime)
            .header("X-Filename", filename)
            .body(data)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractError::Timeout
                } else {
                    ExtractError::Failed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(ExtractError::Failed(format!(
                "extractor returned status {}",
                response.status().as_u16()
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ExtractError::Failed(e.to_string()))?;
        debug!(filename, chars = text.len(), "Document extracted");
        Ok(text)
    }
}

/// Decode UTF-8 and strip control characters that have no business in
/// document text (NUL and friends; newlines and tabs stay).
pub fn decode_plain_text(data: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(data)
        .map_err(|_| ExtractError::Unsupported("file is not valid UTF-8 text".into()))?;
    Ok(sanitize_text(text))
}

pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t' | '\r'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_decoding() {
        let text = decode_plain_text(b"I am a backend engineer.").unwrap();
        assert_eq!(text, "I am a backend engineer.");
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let err = decode_plain_text(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(_)));
    }

    #[test]
    fn control_characters_are_stripped() {
        let text = sanitize_text("line one\nline\ttwo\u{0000}\u{0007}done\r\n");
        assert_eq!(text, "line one\nline\ttwodone\r\n");
        assert!(!text.contains('\u{0000}'));
    }
}

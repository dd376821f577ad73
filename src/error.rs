//! Error taxonomy for the query pipeline.
//!
//! Document-level errors ([`ExtractError`], [`CacheError`]) are absorbed by the
//! resolver and only exclude the offending document. [`FallbackError`] is the
//! only error that degrades a whole query, and it is never shown verbatim.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("OCR failed on page {page}: {reason}")]
    Ocr { page: u32, reason: String },

    #[error("extraction timed out after {0} seconds")]
    Timeout(u64),

    #[error("extraction cancelled")]
    Cancelled,

    #[error("document is too large ({size} bytes, limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read cache entry {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to write cache entry {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("failed to read document {identity}: {reason}")]
    Source { identity: String, reason: String },

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("generation fallback is disabled")]
    Disabled,

    #[error("generation quota exceeded: {0}")]
    Quota(String),

    #[error("generation request timed out after {0} seconds")]
    Timeout(u64),

    #[error("generation transport error: {0}")]
    Transport(String),

    #[error("generation provider error: {0}")]
    Provider(String),
}

impl FallbackError {
    /// Stable message safe to return to a caller.
    pub fn user_message(&self) -> &'static str {
        match self {
            FallbackError::Disabled => {
                "No relevant content found in the documents."
            }
            FallbackError::Quota(_) => {
                "Sorry, the answer service is over its usage limit. Please try again later."
            }
            FallbackError::Timeout(_) => {
                "Sorry, the answer service took too long to respond. Please try again."
            }
            FallbackError::Transport(_) | FallbackError::Provider(_) => {
                "Sorry, something went wrong while generating an answer."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_never_contains_provider_text() {
        let errors = [
            FallbackError::Quota("secret-org-id quota".to_string()),
            FallbackError::Timeout(30),
            FallbackError::Transport("dns error for api.internal".to_string()),
            FallbackError::Provider("{\"error\":\"bad key sk-123\"}".to_string()),
        ];
        for e in &errors {
            let msg = e.user_message();
            assert!(!msg.contains("secret"));
            assert!(!msg.contains("sk-123"));
            assert!(!msg.contains("api.internal"));
        }
    }

    #[test]
    fn quota_and_timeout_messages_are_distinct() {
        assert_ne!(
            FallbackError::Quota(String::new()).user_message(),
            FallbackError::Timeout(1).user_message()
        );
    }
}

//! Core data models used throughout docquery.
//!
//! These types represent the documents, extracted text, and match results that
//! flow through the query-resolution pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Document formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
}

impl DocumentFormat {
    /// Detects the format from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "docx" => Some(DocumentFormat::Docx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
        }
    }
}

/// Reference to one stored document, as listed by a [`DocumentStore`](crate::store::DocumentStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    /// Stable identity: path relative to the store root, `/`-separated.
    pub identity: String,
    /// `None` when the extension is not a supported format.
    pub format: Option<DocumentFormat>,
    /// Changes whenever the stored bytes change.
    pub marker: String,
    pub size: u64,
}

impl DocumentRef {
    /// File name portion of the identity, used in user-facing answers.
    pub fn display_name(&self) -> &str {
        display_name(&self.identity)
    }
}

/// Last `/`-separated component of a document identity.
pub fn display_name(identity: &str) -> &str {
    identity.rsplit('/').next().unwrap_or(identity)
}

/// How a document's text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    /// Text layer only.
    Direct,
    /// Every page went through OCR.
    Ocr,
    /// Some pages direct, some OCR.
    Mixed,
}

/// Plain text extracted from one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedText {
    pub identity: String,
    pub method: ExtractionMethod,
    pub text: String,
    /// Byte offset in `text` where each page starts (PDF only, ascending).
    #[serde(default)]
    pub page_offsets: Vec<usize>,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractedText {
    /// 1-based page containing `offset`, if page boundaries are known.
    pub fn page_at(&self, offset: usize) -> Option<u32> {
        if self.page_offsets.is_empty() {
            return None;
        }
        let idx = self.page_offsets.partition_point(|&start| start <= offset);
        Some(idx.max(1) as u32)
    }
}

/// Kind of match that produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

/// A snippet of a document that answers the query.
///
/// `start..end` is the byte range of `snippet` inside the source
/// [`ExtractedText::text`]; the snippet is always sliced from that text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub identity: String,
    pub page: Option<u32>,
    pub snippet: String,
    pub kind: MatchKind,
    pub score: f64,
    pub start: usize,
    pub end: usize,
}

/// Outcome of resolving one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryResult {
    /// At least one document matched.
    Matches(Vec<MatchCandidate>),
    /// No match; the generation service answered.
    Generated(String),
    /// No match and the generation service failed. Holds a user-safe message.
    Failed(String),
}

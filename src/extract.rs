//! Text extraction for stored documents (PDF, DOCX).
//!
//! PDFs are read page by page from their text layer; pages without text are
//! rendered and sent through OCR. DOCX files yield their non-empty paragraphs
//! in document order. A page or paragraph that cannot be read is skipped with a
//! warning; only a document that yields nothing at all is an error.

use async_trait::async_trait;
use chrono::Utc;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::models::{DocumentFormat, DocumentRef, ExtractedText, ExtractionMethod};
use crate::ocr::{OcrEngine, OcrPool, TesseractEngine};
use crate::store::modification_marker;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Turns one document's bytes into [`ExtractedText`].
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(
        &self,
        doc: &DocumentRef,
        bytes: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<ExtractedText, ExtractError>;
}

pub struct Extractor {
    ocr: Option<OcrPool>,
    document_timeout: Duration,
}

impl Extractor {
    /// Extractor with the Tesseract engine when OCR is enabled.
    pub fn new(config: &ExtractionConfig) -> Self {
        let engine: Option<Arc<dyn OcrEngine>> = if config.ocr_enabled {
            Some(Arc::new(TesseractEngine::new(config)))
        } else {
            None
        };
        Self::with_engine(config, engine)
    }

    pub fn with_engine(config: &ExtractionConfig, engine: Option<Arc<dyn OcrEngine>>) -> Self {
        let ocr = engine.map(|engine| {
            OcrPool::new(
                engine,
                config.worker_count(),
                Duration::from_secs(config.page_timeout_secs),
            )
        });
        Self {
            ocr,
            document_timeout: Duration::from_secs(config.document_timeout_secs),
        }
    }

    /// Extract a file from disk without going through a store or cache.
    pub async fn extract_path(&self, path: &Path) -> Result<ExtractedText, ExtractError> {
        let bytes = tokio::fs::read(path).await?;
        let metadata = tokio::fs::metadata(path).await?;
        let doc = DocumentRef {
            identity: path.to_string_lossy().into_owned(),
            format: DocumentFormat::from_path(path),
            marker: modification_marker(metadata.modified().ok(), metadata.len()),
            size: metadata.len(),
        };
        self.extract(&doc, bytes, &CancellationToken::new()).await
    }

    async fn extract_pdf(
        &self,
        doc: &DocumentRef,
        bytes: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<ExtractedText, ExtractError> {
        let bytes = Arc::new(bytes);
        let direct_bytes = bytes.clone();
        let direct = tokio::task::spawn_blocking(move || direct_pdf_pages(&direct_bytes))
            .await
            .map_err(|e| ExtractError::Pdf(format!("PDF parser crashed: {}", e)))??;

        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        let mut pages: Vec<PageText> = direct
            .into_iter()
            .map(|text| match text {
                Some(t) if !t.trim().is_empty() => PageText::Direct(t),
                _ => PageText::Missing,
            })
            .collect();

        let blank: Vec<u32> = pages
            .iter()
            .enumerate()
            .filter(|(_, p)| matches!(p, PageText::Missing))
            .map(|(i, _)| i as u32 + 1)
            .collect();

        let mut first_failure: Option<ExtractError> = None;

        if !blank.is_empty() {
            match &self.ocr {
                Some(pool) => {
                    debug!(document = %doc.identity, pages = blank.len(), "running ocr");
                    let mut file = tempfile::Builder::new().suffix(".pdf").tempfile()?;
                    file.write_all(&bytes)?;
                    file.flush()?;
                    let pdf_path = file.into_temp_path();

                    for (page, result) in pool.recognize_pages(&pdf_path, &blank, cancel).await {
                        match result {
                            Ok(text) => pages[page as usize - 1] = PageText::Ocr(text),
                            Err(ExtractError::Cancelled) => return Err(ExtractError::Cancelled),
                            Err(e) => {
                                warn!(document = %doc.identity, page, error = %e, "skipping page");
                                first_failure.get_or_insert(e);
                            }
                        }
                    }
                }
                None => {
                    warn!(
                        document = %doc.identity,
                        pages = blank.len(),
                        "pages have no text layer and OCR is disabled"
                    );
                }
            }
        }

        let has_content = pages.iter().any(|p| !matches!(p, PageText::Missing));
        if !has_content {
            return Err(first_failure.unwrap_or_else(|| {
                ExtractError::Pdf("no text layer and OCR is unavailable".to_string())
            }));
        }

        Ok(assemble_pages(&doc.identity, pages))
    }
}

#[async_trait]
impl TextExtractor for Extractor {
    async fn extract(
        &self,
        doc: &DocumentRef,
        bytes: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<ExtractedText, ExtractError> {
        let format = doc
            .format
            .ok_or_else(|| ExtractError::UnsupportedFormat(doc.identity.clone()))?;

        let work = async {
            match format {
                DocumentFormat::Pdf => self.extract_pdf(doc, bytes, cancel).await,
                DocumentFormat::Docx => {
                    let identity = doc.identity.clone();
                    let paragraphs = tokio::task::spawn_blocking(move || {
                        extract_docx_paragraphs(&identity, &bytes)
                    })
                    .await
                    .map_err(|e| ExtractError::Ooxml(format!("DOCX reader crashed: {}", e)))??;
                    Ok(ExtractedText {
                        identity: doc.identity.clone(),
                        method: ExtractionMethod::Direct,
                        text: paragraphs.join("\n\n"),
                        page_offsets: Vec::new(),
                        extracted_at: Utc::now(),
                    })
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExtractError::Cancelled),
            r = tokio::time::timeout(self.document_timeout, work) => {
                r.unwrap_or_else(|_| Err(ExtractError::Timeout(self.document_timeout.as_secs())))
            }
        }
    }
}

enum PageText {
    Direct(String),
    Ocr(String),
    Missing,
}

/// Text layer of every page; `None` for pages the parser could not read.
fn direct_pdf_pages(bytes: &[u8]) -> Result<Vec<Option<String>>, ExtractError> {
    // pdf-extract panics on some malformed fonts and encodings.
    let parsed = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| "text layer parser panicked".to_string())
        .and_then(|r| r.map_err(|e| e.to_string()));
    match parsed {
        Ok(pages) => Ok(pages.into_iter().map(Some).collect()),
        Err(text_err) => {
            // The text layer is unreadable; fall back to OCR for every page if
            // the page tree itself still parses.
            let doc = lopdf::Document::load_mem(bytes)
                .map_err(|e| ExtractError::Pdf(format!("{} ({})", text_err, e)))?;
            let count = doc.get_pages().len();
            if count == 0 {
                return Err(ExtractError::Pdf(text_err));
            }
            Ok(vec![None; count])
        }
    }
}

/// Joins pages with a blank line, recording where each page starts.
fn assemble_pages(identity: &str, pages: Vec<PageText>) -> ExtractedText {
    let mut text = String::new();
    let mut page_offsets = Vec::with_capacity(pages.len());
    let mut direct = 0usize;
    let mut ocr = 0usize;

    for page in &pages {
        let piece = match page {
            PageText::Direct(t) => t.trim(),
            PageText::Ocr(t) => t.trim(),
            PageText::Missing => "",
        };
        if !piece.is_empty() {
            match page {
                PageText::Direct(_) => direct += 1,
                PageText::Ocr(_) => ocr += 1,
                PageText::Missing => {}
            }
            if !text.is_empty() {
                text.push_str("\n\n");
            }
        }
        page_offsets.push(text.len());
        text.push_str(piece);
    }

    let method = match (direct, ocr) {
        (_, 0) => ExtractionMethod::Direct,
        (0, _) => ExtractionMethod::Ocr,
        _ => ExtractionMethod::Mixed,
    };

    ExtractedText {
        identity: identity.to_string(),
        method,
        text,
        page_offsets,
        extracted_at: Utc::now(),
    }
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx_paragraphs(identity: &str, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    docx_paragraphs(identity, &xml)
}

/// Non-empty `<w:p>` paragraphs of a WordprocessingML body, in order.
fn docx_paragraphs(identity: &str, xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push(' '),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => match te.unescape() {
                Ok(s) => current.push_str(&s),
                Err(e) => warn!(document = identity, error = %e, "skipping unreadable text run"),
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                if paragraphs.is_empty() {
                    return Err(ExtractError::Ooxml(e.to_string()));
                }
                warn!(
                    document = identity,
                    error = %e,
                    kept = paragraphs.len(),
                    "malformed document body; keeping paragraphs read so far"
                );
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs)
}

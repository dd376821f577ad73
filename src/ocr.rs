//! OCR for image-only PDF pages.
//!
//! [`OcrEngine`] recognizes one rendered page. [`TesseractEngine`] renders the
//! page with Poppler's `pdftoppm` at a reduced resolution and runs the
//! `tesseract` CLI over the image. [`OcrPool`] fans pages out across a fixed
//! number of workers and stops handing out work once its cancellation token
//! fires.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ExtractionConfig;
use crate::error::ExtractError;

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize the text of `page` (1-based) of the PDF file at `pdf`.
    async fn recognize_page(&self, pdf: &Path, page: u32) -> Result<String, ExtractError>;
}

/// `pdftoppm` + `tesseract` subprocess engine.
pub struct TesseractEngine {
    pdftoppm_bin: String,
    tesseract_bin: String,
    language: String,
    dpi: u32,
}

impl TesseractEngine {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            pdftoppm_bin: config.pdftoppm_bin.clone(),
            tesseract_bin: config.tesseract_bin.clone(),
            language: config.ocr_language.clone(),
            dpi: config.effective_dpi(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn recognize_page(&self, pdf: &Path, page: u32) -> Result<String, ExtractError> {
        let workdir = tempfile::tempdir()?;
        let prefix = workdir.path().join("page");
        let page_arg = page.to_string();

        let render = Command::new(&self.pdftoppm_bin)
            .args(["-f", &page_arg, "-l", &page_arg])
            .args(["-r", &self.dpi.to_string()])
            .args(["-gray", "-png", "-singlefile"])
            .arg(pdf)
            .arg(&prefix)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ocr_error(page, format!("failed to run {}: {}", self.pdftoppm_bin, e)))?;
        if !render.status.success() {
            return Err(ocr_error(
                page,
                format!(
                    "{} exited with {}: {}",
                    self.pdftoppm_bin,
                    render.status,
                    String::from_utf8_lossy(&render.stderr).trim()
                ),
            ));
        }

        let image = prefix.with_extension("png");
        let recognized = Command::new(&self.tesseract_bin)
            .arg(&image)
            .arg("stdout")
            .args(["-l", &self.language])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ocr_error(page, format!("failed to run {}: {}", self.tesseract_bin, e)))?;
        if !recognized.status.success() {
            return Err(ocr_error(
                page,
                format!(
                    "{} exited with {}: {}",
                    self.tesseract_bin,
                    recognized.status,
                    String::from_utf8_lossy(&recognized.stderr).trim()
                ),
            ));
        }

        Ok(String::from_utf8_lossy(&recognized.stdout).into_owned())
    }
}

fn ocr_error(page: u32, reason: String) -> ExtractError {
    ExtractError::Ocr { page, reason }
}

/// Bounded pool that runs one OCR task per page.
///
/// The worker limit is shared by every document that goes through the same
/// pool, so concurrent queries cannot oversubscribe the CPU.
#[derive(Clone)]
pub struct OcrPool {
    engine: Arc<dyn OcrEngine>,
    permits: Arc<Semaphore>,
    page_timeout: Duration,
}

impl OcrPool {
    pub fn new(engine: Arc<dyn OcrEngine>, workers: usize, page_timeout: Duration) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            page_timeout,
        }
    }

    /// OCR `pages` of `pdf`, returning one result per page in page order.
    ///
    /// Pages that have not started when `cancel` fires report
    /// [`ExtractError::Cancelled`]; running subprocesses are killed.
    pub async fn recognize_pages(
        &self,
        pdf: &Path,
        pages: &[u32],
        cancel: &CancellationToken,
    ) -> Vec<(u32, Result<String, ExtractError>)> {
        let mut tasks = JoinSet::new();

        for &page in pages {
            let engine = self.engine.clone();
            let permits = self.permits.clone();
            let cancel = cancel.clone();
            let pdf: PathBuf = pdf.to_path_buf();
            let page_timeout = self.page_timeout;

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return (page, Err(ExtractError::Cancelled)),
                    permit = permits.acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => return (page, Err(ExtractError::Cancelled)),
                    },
                };

                debug!(page, "ocr page start");
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ExtractError::Cancelled),
                    r = tokio::time::timeout(page_timeout, engine.recognize_page(&pdf, page)) => {
                        r.unwrap_or_else(|_| Err(ExtractError::Timeout(page_timeout.as_secs())))
                    }
                };
                (page, result)
            });
        }

        let mut results = Vec::with_capacity(pages.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(e) => {
                    // A panicking engine only loses its own page.
                    tracing::warn!(error = %e, "ocr task failed");
                }
            }
        }
        results.sort_by_key(|(page, _)| *page);
        results
    }
}

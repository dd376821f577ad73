//! Extracted-text cache.
//!
//! One JSON file per document under `cache.dir`, named by the SHA-256 of the
//! document identity. Each entry records the identity and the modification
//! marker it was extracted from; an entry whose marker no longer matches the
//! store is stale and is re-extracted.
//!
//! Extraction for a given identity is single-flight: concurrent callers wait
//! on a per-key lock and then read the entry the first caller wrote. Entries
//! are written to a temporary file in the cache directory and renamed into
//! place, so readers never observe a partial write. Failed extractions are
//! never cached.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CacheError, ExtractError};
use crate::extract::TextExtractor;
use crate::models::{DocumentFormat, DocumentRef, ExtractedText};
use crate::store::DocumentStore;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    identity: String,
    format: Option<DocumentFormat>,
    marker: String,
    extracted: ExtractedText,
}

/// Freshness of a document's cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Fresh,
    Stale,
    Missing,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Fresh => "fresh",
            CacheStatus::Stale => "stale",
            CacheStatus::Missing => "missing",
        }
    }
}

/// Where the text returned by [`TextCache::lookup`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Extracted,
}

pub struct TextCache {
    dir: PathBuf,
    store: Arc<dyn DocumentStore>,
    extractor: Arc<dyn TextExtractor>,
    max_document_bytes: u64,
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TextCache {
    pub fn new(
        dir: &Path,
        store: Arc<dyn DocumentStore>,
        extractor: Arc<dyn TextExtractor>,
        max_document_bytes: u64,
    ) -> Self {
        Self {
            dir: dir.to_path_buf(),
            store,
            extractor,
            max_document_bytes,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Cached text for `doc`, extracting and persisting it on a miss.
    pub async fn get_or_extract(
        &self,
        doc: &DocumentRef,
        cancel: &CancellationToken,
    ) -> Result<ExtractedText, CacheError> {
        self.lookup(doc, cancel).await.map(|(text, _)| text)
    }

    /// Like [`get_or_extract`](Self::get_or_extract), also reporting whether
    /// extraction ran.
    pub async fn lookup(
        &self,
        doc: &DocumentRef,
        cancel: &CancellationToken,
    ) -> Result<(ExtractedText, CacheOutcome), CacheError> {
        if let Some(text) = self.read_fresh(doc).await {
            return Ok((text, CacheOutcome::Hit));
        }

        let key_lock = self.key_lock(&doc.identity);
        let result = {
            let _guard = key_lock.lock().await;
            // Another caller may have finished while we waited.
            match self.read_fresh(doc).await {
                Some(text) => Ok((text, CacheOutcome::Hit)),
                None => self
                    .extract_and_store(doc, cancel)
                    .await
                    .map(|text| (text, CacheOutcome::Extracted)),
            }
        };
        self.release_key_lock(&doc.identity, key_lock);
        result
    }

    /// Freshness of `doc`'s entry without extracting anything.
    pub async fn status(&self, doc: &DocumentRef) -> CacheStatus {
        match self.read_entry(&doc.identity).await {
            Some(entry) if entry.marker == doc.marker => CacheStatus::Fresh,
            Some(_) => CacheStatus::Stale,
            None => CacheStatus::Missing,
        }
    }

    /// Path of the cache file for `identity`.
    pub fn entry_path(&self, identity: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(identity.as_bytes());
        self.dir
            .join(format!("{}.json", hex::encode(hasher.finalize())))
    }

    async fn extract_and_store(
        &self,
        doc: &DocumentRef,
        cancel: &CancellationToken,
    ) -> Result<ExtractedText, CacheError> {
        if doc.size > self.max_document_bytes {
            return Err(ExtractError::TooLarge {
                size: doc.size,
                limit: self.max_document_bytes,
            }
            .into());
        }

        let bytes = self
            .store
            .read(doc)
            .await
            .map_err(|e| CacheError::Source {
                identity: doc.identity.clone(),
                reason: format!("{:#}", e),
            })?;

        debug!(document = %doc.identity, bytes = bytes.len(), "extracting");
        let extracted = self.extractor.extract(doc, bytes, cancel).await?;

        let entry = CacheEntry {
            identity: doc.identity.clone(),
            format: doc.format,
            marker: doc.marker.clone(),
            extracted,
        };
        if let Err(e) = self.write_entry(&entry).await {
            // The text is still good for this request.
            warn!(document = %doc.identity, error = %e, "cache write failed");
        }
        Ok(entry.extracted)
    }

    async fn read_fresh(&self, doc: &DocumentRef) -> Option<ExtractedText> {
        self.read_entry(&doc.identity)
            .await
            .filter(|entry| entry.marker == doc.marker)
            .map(|entry| entry.extracted)
    }

    async fn read_entry(&self, identity: &str) -> Option<CacheEntry> {
        let path = self.entry_path(identity);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                let err = CacheError::Read {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                };
                warn!(document = identity, error = %err, "ignoring cache entry");
                return None;
            }
        };

        match serde_json::from_slice::<CacheEntry>(&raw) {
            Ok(entry) if entry.identity == identity => Some(entry),
            Ok(entry) => {
                warn!(
                    document = identity,
                    found = %entry.identity,
                    "cache entry belongs to another document"
                );
                None
            }
            Err(e) => {
                warn!(document = identity, error = %e, "ignoring corrupt cache entry");
                None
            }
        }
    }

    async fn write_entry(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let path = self.entry_path(&entry.identity);
        let dir = self.dir.clone();
        let json = serde_json::to_vec(entry).map_err(|e| CacheError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let target = path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&json)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| CacheError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?
        .map_err(|e| CacheError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn key_lock(&self, identity: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inflight
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_key_lock(&self, identity: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the map and this caller hold it: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            inflight.remove(identity);
        }
    }
}

//! Read-only document storage.
//!
//! The resolver only needs two operations from storage: list what is there and
//! read one document's bytes. [`FsDocumentStore`] serves a local directory;
//! other backends (object stores, upload buckets) implement [`DocumentStore`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::StoreConfig;
use crate::models::{DocumentFormat, DocumentRef};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every document eligible for a query, in a stable order.
    async fn list(&self) -> Result<Vec<DocumentRef>>;

    /// Full contents of one document.
    async fn read(&self, doc: &DocumentRef) -> Result<Vec<u8>>;
}

/// Documents under a directory, filtered by include/exclude globs.
pub struct FsDocumentStore {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl FsDocumentStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let mut excludes = vec!["**/.git/**".to_string()];
        excludes.extend(config.exclude_globs.clone());

        Ok(Self {
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
            follow_symlinks: config.follow_symlinks,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scan(&self) -> Result<Vec<DocumentRef>> {
        if !self.root.exists() {
            bail!("Document store root does not exist: {}", self.root.display());
        }

        let mut docs = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(self.follow_symlinks) {
            // A dangling symlink or unreadable directory only drops itself
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable store entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let identity = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if self.exclude.is_match(&identity) || !self.include.is_match(&identity) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(identity = %identity, error = %e, "skipping document without metadata");
                    continue;
                }
            };
            docs.push(DocumentRef {
                format: DocumentFormat::from_path(path),
                marker: modification_marker(metadata.modified().ok(), metadata.len()),
                size: metadata.len(),
                identity,
            });
        }

        // Sort for deterministic ordering
        docs.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(docs)
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn list(&self) -> Result<Vec<DocumentRef>> {
        self.scan()
    }

    async fn read(&self, doc: &DocumentRef) -> Result<Vec<u8>> {
        let path = self.root.join(&doc.identity);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }
}

/// `"{mtime_nanos}:{len}"`; changes whenever the file is rewritten or resized.
pub fn modification_marker(modified: Option<SystemTime>, len: u64) -> String {
    let nanos = modified
        .and_then(|m| m.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{}:{}", nanos, len)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

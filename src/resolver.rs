//! Query resolution pipeline.
//!
//! ```text
//! list documents ──► cached-or-extracted text ──► Matcher
//!                                                   │
//!                       candidates? ── yes ──► QueryResult::Matches
//!                           │
//!                           no ──► generation fallback ──► Generated | Failed
//! ```
//!
//! Per-document failures (unreadable, unsupported, corrupt, oversized, timed
//! out) are logged and that document is left out of the corpus. Only the
//! fallback can degrade a query, and its error text never reaches the caller.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheOutcome, CacheStatus, TextCache};
use crate::config::Config;
use crate::error::{CacheError, ExtractError, FallbackError};
use crate::extract::{Extractor, TextExtractor};
use crate::fallback::{create_provider, GenerationProvider};
use crate::matcher::Matcher;
use crate::models::{display_name, DocumentRef, ExtractedText, MatchCandidate, QueryResult};
use crate::progress::{DocumentOutcome, PreprocessEvent, ProgressReporter};
use crate::store::{DocumentStore, FsDocumentStore};

/// Per-outcome document counts from [`Resolver::preprocess`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreprocessSummary {
    pub total: u64,
    pub cached: u64,
    pub extracted: u64,
    pub failed: u64,
    pub unsupported: u64,
}

pub struct Resolver {
    config: Arc<Config>,
    store: Arc<dyn DocumentStore>,
    cache: TextCache,
    matcher: Arc<Matcher>,
    fallback: Arc<dyn GenerationProvider>,
}

impl Resolver {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn DocumentStore>,
        extractor: Arc<dyn TextExtractor>,
        fallback: Arc<dyn GenerationProvider>,
    ) -> Self {
        let cache = TextCache::new(
            &config.cache.dir,
            store.clone(),
            extractor,
            config.store.max_document_bytes,
        );
        let matcher = Arc::new(Matcher::new(config.matching.clone()));
        Self {
            config,
            store,
            cache,
            matcher,
            fallback,
        }
    }

    /// Resolver over the configured directory store, with the Tesseract OCR
    /// engine and the configured fallback provider.
    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        let store = Arc::new(FsDocumentStore::new(&config.store)?);
        let extractor = Arc::new(Extractor::new(&config.extraction));
        let fallback = create_provider(&config.fallback)?;
        Ok(Self::new(config, store, extractor, fallback))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn resolve(&self, query: &str) -> QueryResult {
        self.resolve_with_cancel(query, &CancellationToken::new())
            .await
    }

    /// Like [`resolve`](Self::resolve); cancelling `cancel` abandons any
    /// extraction still running for this query.
    pub async fn resolve_with_cancel(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> QueryResult {
        let corpus = self.load_corpus(cancel).await;
        let documents = corpus.len();
        let candidates = self.find_matches(query, corpus).await;
        if !candidates.is_empty() {
            info!(documents, matches = candidates.len(), "query matched");
            return QueryResult::Matches(candidates);
        }

        info!(documents, "no match, using fallback");
        self.call_fallback(query).await
    }

    /// Runs the matcher on the blocking pool; fuzzy scoring of large
    /// documents is CPU-bound.
    async fn find_matches(&self, query: &str, corpus: Vec<ExtractedText>) -> Vec<MatchCandidate> {
        let matcher = self.matcher.clone();
        let query = query.to_string();
        match tokio::task::spawn_blocking(move || matcher.find(&query, &corpus)).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "matcher task failed");
                Vec::new()
            }
        }
    }

    /// Text of every readable document, in store order.
    pub async fn load_corpus(&self, cancel: &CancellationToken) -> Vec<ExtractedText> {
        let docs = match self.store.list().await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "document listing failed");
                return Vec::new();
            }
        };

        let mut corpus = Vec::with_capacity(docs.len());
        for doc in &docs {
            if cancel.is_cancelled() {
                break;
            }
            if doc.format.is_none() {
                debug!(document = %doc.identity, "skipping unsupported format");
                continue;
            }
            match self.cache.get_or_extract(doc, cancel).await {
                Ok(text) => corpus.push(text),
                Err(e) => log_skip(doc, &e),
            }
        }
        corpus
    }

    async fn call_fallback(&self, query: &str) -> QueryResult {
        let settings = &self.config.fallback;
        let limit = Duration::from_secs(settings.timeout_secs);
        let attempt = tokio::time::timeout(
            limit,
            self.fallback
                .generate(query, settings.max_tokens, settings.temperature),
        )
        .await
        .unwrap_or_else(|_| Err(FallbackError::Timeout(settings.timeout_secs)));

        match attempt {
            Ok(reply) => QueryResult::Generated(reply),
            Err(FallbackError::Disabled) => {
                debug!("fallback disabled");
                QueryResult::Failed(FallbackError::Disabled.user_message().to_string())
            }
            Err(e) => {
                warn!(provider = self.fallback.name(), error = %e, "fallback failed");
                QueryResult::Failed(e.user_message().to_string())
            }
        }
    }

    /// Extract and cache every document so later queries only read the cache.
    pub async fn preprocess(
        &self,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<PreprocessSummary> {
        let docs = self.store.list().await?;
        let total = docs.len() as u64;
        reporter.report(PreprocessEvent::Listed { total });

        let mut summary = PreprocessSummary {
            total,
            ..Default::default()
        };
        for (i, doc) in docs.iter().enumerate() {
            if cancel.is_cancelled() {
                anyhow::bail!("preprocess cancelled after {} of {} documents", i, total);
            }

            let outcome = if doc.format.is_none() {
                summary.unsupported += 1;
                DocumentOutcome::Unsupported
            } else {
                match self.cache.lookup(doc, cancel).await {
                    Ok((_, CacheOutcome::Hit)) => {
                        summary.cached += 1;
                        DocumentOutcome::Cached
                    }
                    Ok((_, CacheOutcome::Extracted)) => {
                        summary.extracted += 1;
                        DocumentOutcome::Extracted
                    }
                    Err(e) => {
                        log_skip(doc, &e);
                        summary.failed += 1;
                        DocumentOutcome::Failed
                    }
                }
            };

            reporter.report(PreprocessEvent::Document {
                identity: doc.identity.clone(),
                outcome,
                n: i as u64 + 1,
                total,
            });
        }

        info!(
            total = summary.total,
            cached = summary.cached,
            extracted = summary.extracted,
            failed = summary.failed,
            unsupported = summary.unsupported,
            "preprocess complete"
        );
        Ok(summary)
    }

    /// Every listed document with the freshness of its cache entry.
    pub async fn cache_status(&self) -> Result<Vec<(DocumentRef, CacheStatus)>> {
        let docs = self.store.list().await?;
        let mut rows = Vec::with_capacity(docs.len());
        for doc in docs {
            let status = self.cache.status(&doc).await;
            rows.push((doc, status));
        }
        Ok(rows)
    }
}

fn log_skip(doc: &DocumentRef, err: &CacheError) {
    match err {
        CacheError::Extract(ExtractError::Cancelled) => {
            debug!(document = %doc.identity, "extraction cancelled")
        }
        _ => warn!(document = %doc.identity, error = %err, "skipping document"),
    }
}

/// One candidate as a line of the answer.
pub fn format_candidate(candidate: &MatchCandidate) -> String {
    let name = display_name(&candidate.identity);
    match candidate.page {
        Some(page) => format!("found in {} (page {}): {}", name, page, candidate.snippet),
        None => format!("found in {}: {}", name, candidate.snippet),
    }
}

/// The whole result as text for terminals and chat replies.
pub fn format_result(result: &QueryResult) -> String {
    match result {
        QueryResult::Matches(candidates) => candidates
            .iter()
            .map(format_candidate)
            .collect::<Vec<_>>()
            .join("\n\n"),
        QueryResult::Generated(reply) => reply.clone(),
        QueryResult::Failed(message) => message.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentFormat, ExtractionMethod, MatchKind};
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory store whose "bytes" are the text itself.
    struct MapStore {
        docs: Vec<(String, String)>,
    }

    #[async_trait]
    impl DocumentStore for MapStore {
        async fn list(&self) -> Result<Vec<DocumentRef>> {
            Ok(self
                .docs
                .iter()
                .map(|(identity, body)| DocumentRef {
                    identity: identity.clone(),
                    format: DocumentFormat::from_path(std::path::Path::new(identity)),
                    marker: format!("1:{}", body.len()),
                    size: body.len() as u64,
                })
                .collect())
        }

        async fn read(&self, doc: &DocumentRef) -> Result<Vec<u8>> {
            self.docs
                .iter()
                .find(|(identity, _)| identity == &doc.identity)
                .map(|(_, body)| body.as_bytes().to_vec())
                .ok_or_else(|| anyhow::anyhow!("no such document"))
        }
    }

    /// Treats the bytes as UTF-8 text; bodies starting with `!` fail.
    struct PlainExtractor;

    #[async_trait]
    impl TextExtractor for PlainExtractor {
        async fn extract(
            &self,
            doc: &DocumentRef,
            bytes: Vec<u8>,
            _cancel: &CancellationToken,
        ) -> Result<ExtractedText, ExtractError> {
            let text = String::from_utf8(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
            if text.starts_with('!') {
                return Err(ExtractError::Pdf("broken xref table".to_string()));
            }
            Ok(ExtractedText {
                identity: doc.identity.clone(),
                method: ExtractionMethod::Direct,
                text,
                page_offsets: vec![0],
                extracted_at: Utc::now(),
            })
        }
    }

    struct ScriptedProvider {
        reply: std::result::Result<String, fn() -> FallbackError>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GenerationProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            prompt: &str,
            _max_tokens: u32,
            _temperature: f32,
        ) -> std::result::Result<String, FallbackError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    struct HangingProvider;

    #[async_trait]
    impl GenerationProvider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn generate(
            &self,
            _prompt: &str,
            _max_tokens: u32,
            _temperature: f32,
        ) -> std::result::Result<String, FallbackError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("too late".to_string())
        }
    }

    fn resolver(
        tmp: &TempDir,
        docs: &[(&str, &str)],
        fallback: Arc<dyn GenerationProvider>,
    ) -> Resolver {
        let config = Config::with_dirs(&tmp.path().join("docs"), &tmp.path().join("cache"));
        let store = MapStore {
            docs: docs
                .iter()
                .map(|(i, b)| (i.to_string(), b.to_string()))
                .collect(),
        };
        Resolver::new(
            Arc::new(config),
            Arc::new(store),
            Arc::new(PlainExtractor),
            fallback,
        )
    }

    fn replying(text: &str) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider {
            reply: Ok(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn exact_match_returns_candidates() {
        let tmp = TempDir::new().unwrap();
        let fallback = replying("unused");
        let r = resolver(
            &tmp,
            &[("geo.pdf", "The capital of France is Paris.")],
            fallback.clone(),
        );

        match r.resolve("capital of France").await {
            QueryResult::Matches(c) => {
                assert_eq!(c.len(), 1);
                assert_eq!(c[0].kind, MatchKind::Exact);
                assert!(c[0].snippet.contains("Paris"));
            }
            other => panic!("expected matches, got {:?}", other),
        }
        assert!(fallback.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_corpus_uses_fallback_with_raw_query() {
        let tmp = TempDir::new().unwrap();
        let fallback = replying("Paris is the capital.");
        let r = resolver(&tmp, &[], fallback.clone());

        let result = r.resolve("What is the capital of France?").await;
        assert_eq!(result, QueryResult::Generated("Paris is the capital.".to_string()));
        assert_eq!(
            fallback.prompts.lock().unwrap().as_slice(),
            ["What is the capital of France?".to_string()]
        );
    }

    #[tokio::test]
    async fn fallback_failure_is_user_safe() {
        let tmp = TempDir::new().unwrap();
        let fallback = Arc::new(ScriptedProvider {
            reply: Err(|| FallbackError::Quota("secret-org-id quota exceeded".to_string())),
            prompts: Mutex::new(Vec::new()),
        });
        let r = resolver(&tmp, &[], fallback);

        match r.resolve("anything").await {
            QueryResult::Failed(message) => {
                assert!(!message.contains("secret-org-id"));
                assert_eq!(message, FallbackError::Quota(String::new()).user_message());
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn hanging_fallback_times_out() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::with_dirs(&tmp.path().join("docs"), &tmp.path().join("cache"));
        config.fallback.timeout_secs = 1;
        let r = Resolver::new(
            Arc::new(config),
            Arc::new(MapStore { docs: Vec::new() }),
            Arc::new(PlainExtractor),
            Arc::new(HangingProvider),
        );
        match r.resolve("anything").await {
            QueryResult::Failed(message) => {
                assert_eq!(message, FallbackError::Timeout(0).user_message())
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn broken_document_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let r = resolver(
            &tmp,
            &[
                ("a-broken.pdf", "!garbage"),
                ("b-good.pdf", "The capital of France is Paris."),
            ],
            replying("unused"),
        );

        match r.resolve("Paris").await {
            QueryResult::Matches(c) => {
                assert_eq!(c.len(), 1);
                assert_eq!(c[0].identity, "b-good.pdf");
            }
            other => panic!("expected matches, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn preprocess_counts_outcomes() {
        let tmp = TempDir::new().unwrap();
        let r = resolver(
            &tmp,
            &[
                ("a.pdf", "alpha"),
                ("b.pdf", "!broken"),
                ("c.txt", "plain text"),
            ],
            replying("unused"),
        );

        let first = r
            .preprocess(&NoProgress, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            first,
            PreprocessSummary {
                total: 3,
                cached: 0,
                extracted: 1,
                failed: 1,
                unsupported: 1,
            }
        );

        let second = r
            .preprocess(&NoProgress, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.cached, 1);
        assert_eq!(second.extracted, 0);

        let status: HashMap<String, CacheStatus> = r
            .cache_status()
            .await
            .unwrap()
            .into_iter()
            .map(|(d, s)| (d.identity, s))
            .collect();
        assert_eq!(status["a.pdf"], CacheStatus::Fresh);
        assert_eq!(status["b.pdf"], CacheStatus::Missing);
    }

    #[tokio::test]
    async fn cancelled_query_skips_extraction() {
        let tmp = TempDir::new().unwrap();
        let r = resolver(&tmp, &[("a.pdf", "alpha")], replying("reply"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(r.load_corpus(&cancel).await.is_empty());
    }

    #[test]
    fn candidate_formatting() {
        let mut candidate = MatchCandidate {
            identity: "reports/geo.pdf".to_string(),
            page: Some(2),
            snippet: "Paris".to_string(),
            kind: MatchKind::Exact,
            score: 1.0,
            start: 0,
            end: 5,
        };
        assert_eq!(format_candidate(&candidate), "found in geo.pdf (page 2): Paris");
        candidate.page = None;
        assert_eq!(format_candidate(&candidate), "found in geo.pdf: Paris");

        let result = QueryResult::Matches(vec![candidate.clone(), candidate]);
        assert_eq!(
            format_result(&result),
            "found in geo.pdf: Paris\n\nfound in geo.pdf: Paris"
        );
        assert_eq!(format_result(&QueryResult::Generated("hi".into())), "hi");
    }
}

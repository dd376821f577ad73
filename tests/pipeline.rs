//! End-to-end query resolution over a directory of real PDF and DOCX files.

mod common;

use common::{minimal_docx, minimal_pdf, write, FixedOcr, StubProvider};
use docquery::cache::CacheStatus;
use docquery::config::Config;
use docquery::extract::Extractor;
use docquery::models::{ExtractionMethod, MatchKind, QueryResult};
use docquery::progress::NoProgress;
use docquery::resolver::{format_result, Resolver};
use docquery::store::FsDocumentStore;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const PARIS: &str = "The capital of France is Paris.";

struct Env {
    _tmp: TempDir,
    docs: PathBuf,
    config: Arc<Config>,
}

fn env() -> Env {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    let config = Config::with_dirs(&docs, &tmp.path().join("cache"));
    Env {
        _tmp: tmp,
        docs,
        config: Arc::new(config),
    }
}

fn resolver(env: &Env, ocr: Arc<FixedOcr>, fallback: Arc<StubProvider>) -> Resolver {
    let store = Arc::new(FsDocumentStore::new(&env.config.store).unwrap());
    let extractor = Arc::new(Extractor::with_engine(
        &env.config.extraction,
        Some(ocr),
    ));
    Resolver::new(env.config.clone(), store, extractor, fallback)
}

#[tokio::test]
async fn pdf_exact_match_reports_document_and_page() {
    let env = env();
    write(&env.docs, "geo/france.pdf", &minimal_pdf(PARIS));
    // Used only if the text layer cannot be read.
    let ocr = Arc::new(FixedOcr::new(PARIS));
    let fallback = Arc::new(StubProvider::replying("unused"));
    let r = resolver(&env, ocr, fallback.clone());

    let result = r.resolve("capital of France").await;
    let QueryResult::Matches(candidates) = &result else {
        panic!("expected matches, got {:?}", result);
    };
    assert_eq!(candidates[0].identity, "geo/france.pdf");
    assert_eq!(candidates[0].kind, MatchKind::Exact);
    assert_eq!(candidates[0].page, Some(1));
    assert!(candidates[0].snippet.contains("Paris"));
    assert!(format_result(&result).starts_with("found in france.pdf (page 1): "));
    assert!(fallback.prompts().is_empty());
}

#[tokio::test]
async fn docx_paragraph_is_found() {
    let env = env();
    write(
        &env.docs,
        "notes.docx",
        &minimal_docx(&["Meeting notes", PARIS, "Action items follow."]),
    );
    let r = resolver(
        &env,
        Arc::new(FixedOcr::new("")),
        Arc::new(StubProvider::replying("unused")),
    );

    match r.resolve("What is the capital of France?").await {
        QueryResult::Matches(c) => {
            assert_eq!(c.len(), 1);
            assert_eq!(c[0].page, None);
            assert!(c[0].snippet.contains("Paris"));
        }
        other => panic!("expected matches, got {:?}", other),
    }
}

#[tokio::test]
async fn empty_corpus_returns_fallback_reply() {
    let env = env();
    let fallback = Arc::new(StubProvider::replying("Paris, most likely."));
    let r = resolver(&env, Arc::new(FixedOcr::new("")), fallback.clone());

    let result = r.resolve("What is the capital of France?").await;
    assert_eq!(result, QueryResult::Generated("Paris, most likely.".to_string()));
    assert_eq!(fallback.prompts(), vec!["What is the capital of France?".to_string()]);
}

#[tokio::test]
async fn failing_fallback_hides_provider_details() {
    let env = env();
    let r = resolver(
        &env,
        Arc::new(FixedOcr::new("")),
        Arc::new(StubProvider::failing()),
    );

    match r.resolve("anything at all").await {
        QueryResult::Failed(message) => {
            assert!(!message.contains("10.0.0.7"));
            assert!(!message.is_empty());
        }
        other => panic!("expected failure message, got {:?}", other),
    }
}

#[tokio::test]
async fn corrupt_document_is_excluded() {
    let env = env();
    write(&env.docs, "a-corrupt.pdf", b"%PDF-1.4\nthis is not really a pdf");
    write(&env.docs, "b-truncated.docx", b"PK\x03\x04 broken zip");
    write(&env.docs, "c-good.docx", &minimal_docx(&[PARIS]));
    let r = resolver(
        &env,
        Arc::new(FixedOcr::new("")),
        Arc::new(StubProvider::replying("unused")),
    );

    match r.resolve("Paris").await {
        QueryResult::Matches(c) => {
            assert_eq!(c.len(), 1);
            assert_eq!(c[0].identity, "c-good.docx");
        }
        other => panic!("expected matches, got {:?}", other),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn dangling_symlink_does_not_hide_documents() {
    let mut env = env();
    let mut config = (*env.config).clone();
    config.store.follow_symlinks = true;
    env.config = Arc::new(config);
    write(&env.docs, "good.docx", &minimal_docx(&[PARIS]));
    std::os::unix::fs::symlink(env.docs.join("gone.pdf"), env.docs.join("dangling.pdf"))
        .unwrap();
    let fallback = Arc::new(StubProvider::replying("unused"));
    let r = resolver(&env, Arc::new(FixedOcr::new("")), fallback.clone());

    match r.resolve("capital of France").await {
        QueryResult::Matches(c) => {
            assert_eq!(c.len(), 1);
            assert_eq!(c[0].identity, "good.docx");
        }
        other => panic!("expected matches, got {:?}", other),
    }
    assert!(fallback.prompts().is_empty());
}

#[tokio::test]
async fn misspelled_query_matches_fuzzily() {
    let env = env();
    write(&env.docs, "geo.docx", &minimal_docx(&[PARIS]));
    let r = resolver(
        &env,
        Arc::new(FixedOcr::new("")),
        Arc::new(StubProvider::replying("unused")),
    );

    match r.resolve("capitol of Franse").await {
        QueryResult::Matches(c) => {
            assert_eq!(c[0].kind, MatchKind::Fuzzy);
            assert_eq!(c[0].snippet, PARIS);
            assert!(c[0].score > 0.5);
        }
        other => panic!("expected fuzzy match, got {:?}", other),
    }
}

#[tokio::test]
async fn scanned_pdf_goes_through_ocr_once() {
    let env = env();
    write(&env.docs, "scan.pdf", &minimal_pdf(""));
    let ocr = Arc::new(FixedOcr::new("Invoice total due: 42 EUR"));
    let r = resolver(&env, ocr.clone(), Arc::new(StubProvider::replying("unused")));

    let corpus = r.load_corpus(&CancellationToken::new()).await;
    assert_eq!(corpus.len(), 1);
    assert_eq!(corpus[0].method, ExtractionMethod::Ocr);
    assert_eq!(ocr.calls(), 1);

    match r.resolve("invoice total").await {
        QueryResult::Matches(c) => assert_eq!(c[0].page, Some(1)),
        other => panic!("expected matches, got {:?}", other),
    }
    // Second query read the cache.
    assert_eq!(ocr.calls(), 1);
}

#[tokio::test]
async fn preprocess_is_idempotent_and_tracks_changes() {
    let env = env();
    write(&env.docs, "one.docx", &minimal_docx(&["first version"]));
    write(&env.docs, "two.docx", &minimal_docx(&["another document"]));
    let r = resolver(
        &env,
        Arc::new(FixedOcr::new("")),
        Arc::new(StubProvider::replying("unused")),
    );
    let cancel = CancellationToken::new();

    let first = r.preprocess(&NoProgress, &cancel).await.unwrap();
    assert_eq!((first.total, first.extracted, first.cached), (2, 2, 0));

    let second = r.preprocess(&NoProgress, &cancel).await.unwrap();
    assert_eq!((second.extracted, second.cached), (0, 2));

    write(
        &env.docs,
        "one.docx",
        &minimal_docx(&["second version, now longer than before"]),
    );
    let statuses: Vec<CacheStatus> = r
        .cache_status()
        .await
        .unwrap()
        .into_iter()
        .map(|(_, s)| s)
        .collect();
    assert_eq!(statuses, vec![CacheStatus::Stale, CacheStatus::Fresh]);

    match r.resolve("now longer than before").await {
        QueryResult::Matches(c) => assert_eq!(c[0].identity, "one.docx"),
        other => panic!("expected matches, got {:?}", other),
    }
}

//! Preprocess progress reporting.
//!
//! `dq preprocess` can take minutes on a large or scanned corpus, so each
//! finished document is reported as it completes. Progress goes to **stderr**
//! so stdout stays parseable for scripts.

use std::io::Write;

/// What happened to one document during preprocessing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DocumentOutcome {
    /// Cache entry was already fresh.
    Cached,
    /// Text was extracted and written to the cache.
    Extracted,
    /// Extraction or reading failed; the document is skipped by queries.
    Failed,
    /// Extension is not a supported format.
    Unsupported,
}

impl DocumentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentOutcome::Cached => "cached",
            DocumentOutcome::Extracted => "extracted",
            DocumentOutcome::Failed => "failed",
            DocumentOutcome::Unsupported => "unsupported",
        }
    }
}

/// A single preprocess progress event.
#[derive(Clone, Debug)]
pub enum PreprocessEvent {
    /// The store listing finished.
    Listed { total: u64 },
    /// Document `n` of `total` finished.
    Document {
        identity: String,
        outcome: DocumentOutcome,
        n: u64,
        total: u64,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: PreprocessEvent);
}

/// Human-friendly progress on stderr: "preprocess  12 / 1,500  extracted  a/b.pdf".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: PreprocessEvent) {
        let line = match &event {
            PreprocessEvent::Listed { total } => {
                format!("preprocess  {} documents\n", format_number(*total))
            }
            PreprocessEvent::Document {
                identity,
                outcome,
                n,
                total,
            } => format!(
                "preprocess  {} / {}  {:<11}  {}\n",
                format_number(*n),
                format_number(*total),
                outcome.as_str(),
                identity
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: PreprocessEvent) {
        let obj = match &event {
            PreprocessEvent::Listed { total } => serde_json::json!({
                "event": "listed",
                "total": total
            }),
            PreprocessEvent::Document {
                identity,
                outcome,
                n,
                total,
            } => serde_json::json!({
                "event": "document",
                "document": identity,
                "outcome": outcome.as_str(),
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: PreprocessEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

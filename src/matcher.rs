//! Query matching against extracted document text.
//!
//! Matching runs in two phases:
//!
//! 1. **Exact**: case-insensitive substring search of the normalized query.
//!    Each document contributes at most one candidate (its first occurrence),
//!    in corpus order. In [`ExactMode::First`] the scan stops at the first
//!    document that matches.
//! 2. **Fuzzy**: only when the exact phase found nothing. Every blank-line
//!    delimited paragraph is scored with [`similarity`]; paragraphs scoring
//!    above the threshold are returned best-first, earliest-first on ties,
//!    widened by the configured context radius. Paragraphs longer than
//!    [`MAX_PASSAGE_CHARS`] (OCR output often has no blank lines) are scored
//!    as whitespace-bounded passages of at most that length.
//!
//! Both phases compare text through the same case folding, which also treats
//! final sigma `ς` as `σ`.
//!
//! Every snippet is sliced from the source text by byte offsets, so
//! `text[candidate.start..candidate.end] == candidate.snippet` always holds.

use std::collections::HashMap;

use crate::config::{ExactMode, MatchingConfig};
use crate::models::{ExtractedText, MatchCandidate, MatchKind};

/// Longest span, in characters, scored as one fuzzy passage.
pub const MAX_PASSAGE_CHARS: usize = 1000;

/// Partial-ratio windows scored exactly per passage, best character overlap first.
const MAX_SCORED_WINDOWS: usize = 32;

/// Lower-cases, collapses whitespace, drops trailing `?`/`!`/`.` and strips
/// leading question phrases such as "what is" or "define".
///
/// Idempotent: normalizing a normalized query returns it unchanged.
pub fn normalize_query(query: &str, prefixes: &[String]) -> String {
    let mut normalized = query
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    trim_trailing_punctuation(&mut normalized);

    loop {
        let stripped = prefixes.iter().find_map(|prefix| {
            let prefix = prefix.trim().to_lowercase();
            if prefix.is_empty() {
                return None;
            }
            normalized
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix(' '))
                .map(|rest| rest.to_string())
        });
        match stripped {
            Some(rest) if !rest.is_empty() => normalized = rest,
            _ => break,
        }
    }

    normalized
}

fn trim_trailing_punctuation(s: &mut String) {
    let trimmed_len = s
        .trim_end_matches(|c: char| c == '?' || c == '!' || c == '.' || c.is_whitespace())
        .len();
    s.truncate(trimmed_len);
}

/// Runs the exact and fuzzy phases for one query.
pub struct Matcher {
    config: MatchingConfig,
}

impl Matcher {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    pub fn normalize(&self, query: &str) -> String {
        normalize_query(query, &self.config.question_prefixes)
    }

    /// Exact hits if there are any, otherwise fuzzy hits.
    pub fn find(&self, query: &str, corpus: &[ExtractedText]) -> Vec<MatchCandidate> {
        let normalized = self.normalize(query);
        if normalized.is_empty() {
            return Vec::new();
        }

        let exact = self.exact_phase(&normalized, corpus);
        if !exact.is_empty() {
            return exact;
        }
        self.fuzzy_phase(&normalized, corpus)
    }

    /// Case-insensitive substring search; `query` is used as given.
    pub fn exact_phase(&self, query: &str, corpus: &[ExtractedText]) -> Vec<MatchCandidate> {
        let (needle, _) = fold_case(query);
        if needle.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for doc in corpus {
            let (haystack, spans) = fold_case(&doc.text);
            let Some(found) = haystack.find(&needle) else {
                continue;
            };

            let match_start = spans[found].0;
            let match_end = spans[found + needle.len() - 1].1;
            let (start, end) =
                centered_window(&doc.text, match_start, match_end, self.config.snippet_width);

            candidates.push(MatchCandidate {
                identity: doc.identity.clone(),
                page: doc.page_at(match_start),
                snippet: doc.text[start..end].to_string(),
                kind: MatchKind::Exact,
                score: 1.0,
                start,
                end,
            });

            if self.config.exact_mode == ExactMode::First {
                break;
            }
        }
        candidates
    }

    /// Paragraph-level similarity search.
    pub fn fuzzy_phase(&self, query: &str, corpus: &[ExtractedText]) -> Vec<MatchCandidate> {
        let query_chars = fold_chars(query);
        if query_chars.is_empty() {
            return Vec::new();
        }

        // (score, doc index, paragraph start, paragraph end)
        let mut scored: Vec<(f64, usize, usize, usize)> = Vec::new();
        for (doc_idx, doc) in corpus.iter().enumerate() {
            for (start, end) in passage_spans(&doc.text) {
                let para_chars = fold_chars(&doc.text[start..end]);
                let score = similarity_chars(&query_chars, &para_chars);
                if score > self.config.fuzzy_threshold {
                    scored.push((score, doc_idx, start, end));
                }
            }
        }

        // Stable: equal scores keep corpus order, then document order.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.config.max_fuzzy_results);

        scored
            .into_iter()
            .map(|(score, doc_idx, para_start, para_end)| {
                let doc = &corpus[doc_idx];
                let start = step_back(&doc.text, para_start, self.config.context_radius).0;
                let end = step_forward(&doc.text, para_end, self.config.context_radius).0;
                MatchCandidate {
                    identity: doc.identity.clone(),
                    page: doc.page_at(para_start),
                    snippet: doc.text[start..end].to_string(),
                    kind: MatchKind::Fuzzy,
                    score,
                    start,
                    end,
                }
            })
            .collect()
    }
}

/// Per-character lower-casing with final sigma folded to `σ`.
///
/// `str::to_lowercase` picks `ς` or `σ` from context, so a word cut out of a
/// sentence would lower-case differently from the sentence itself.
fn fold_char(ch: char) -> impl Iterator<Item = char> {
    ch.to_lowercase()
        .map(|lower| if lower == 'ς' { 'σ' } else { lower })
}

fn fold_chars(text: &str) -> Vec<char> {
    text.chars().flat_map(fold_char).collect()
}

/// Folds `text` with [`fold_char`], returning the folded string and, for every
/// byte of it, the byte range of the source character it came from.
fn fold_case(text: &str) -> (String, Vec<(usize, usize)>) {
    let mut folded = String::with_capacity(text.len());
    let mut spans = Vec::with_capacity(text.len());
    for (idx, ch) in text.char_indices() {
        let src = (idx, idx + ch.len_utf8());
        for lower in fold_char(ch) {
            folded.push(lower);
            spans.extend(std::iter::repeat(src).take(lower.len_utf8()));
        }
    }
    (folded, spans)
}

/// Window of about `width` characters around `start..end`, clamped to `text`.
///
/// Slack that cannot be spent on one side moves to the other.
fn centered_window(text: &str, start: usize, end: usize, width: usize) -> (usize, usize) {
    let match_chars = text[start..end].chars().count();
    if width <= match_chars {
        return (start, end);
    }
    let slack = width - match_chars;
    let before = slack / 2;
    let after = slack - before;

    let (new_start, taken_before) = step_back(text, start, before);
    let (new_end, taken_after) = step_forward(text, end, after + (before - taken_before));
    let unused_after = (after + (before - taken_before)) - taken_after;
    let new_start = if unused_after > 0 {
        step_back(text, new_start, unused_after).0
    } else {
        new_start
    };
    (new_start, new_end)
}

/// Moves `pos` back by up to `n` characters; returns the new position and the
/// number of characters actually moved.
fn step_back(text: &str, pos: usize, n: usize) -> (usize, usize) {
    let mut new_pos = pos;
    let mut moved = 0;
    for (idx, _) in text[..pos].char_indices().rev().take(n) {
        new_pos = idx;
        moved += 1;
    }
    (new_pos, moved)
}

/// Moves `pos` forward by up to `n` characters.
fn step_forward(text: &str, pos: usize, n: usize) -> (usize, usize) {
    let mut new_pos = pos;
    let mut moved = 0;
    for ch in text[pos..].chars().take(n) {
        new_pos += ch.len_utf8();
        moved += 1;
    }
    (new_pos, moved)
}

/// Byte spans of blank-line delimited paragraphs, trimmed of surrounding whitespace.
fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        if line.trim().is_empty() {
            if let Some(span) = current.take() {
                spans.push(span);
            }
            continue;
        }

        let content = line.trim();
        let content_start = line_start + (line.len() - line.trim_start().len());
        let content_end = content_start + content.len();
        current = match current {
            Some((s, _)) => Some((s, content_end)),
            None => Some((content_start, content_end)),
        };
    }
    if let Some(span) = current {
        spans.push(span);
    }
    spans
}

/// Paragraph spans, with paragraphs over [`MAX_PASSAGE_CHARS`] cut at
/// whitespace into consecutive passages.
fn passage_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    for (start, end) in paragraph_spans(text) {
        let mut pos = start;
        while pos < end {
            let (limit, moved) = step_forward(&text[..end], pos, MAX_PASSAGE_CHARS);
            if moved < MAX_PASSAGE_CHARS || limit == end {
                spans.push((pos, end));
                break;
            }
            // Cut at the last whitespace in the passage; a single long
            // word is cut mid-word.
            let cut = text[pos..limit]
                .rfind(char::is_whitespace)
                .filter(|&i| i > 0)
                .map(|i| pos + i)
                .unwrap_or(limit);
            spans.push((pos, pos + text[pos..cut].trim_end().len()));
            pos = end - text[cut..end].trim_start().len();
        }
    }
    spans
}

/// Similarity of two strings in `[0.0, 1.0]`, ignoring case.
///
/// Average of the LCS ratio over the whole strings and the best LCS ratio of
/// the shorter string against any equally long window of the longer one.
pub fn similarity(a: &str, b: &str) -> f64 {
    similarity_chars(&fold_chars(a), &fold_chars(b))
}

fn similarity_chars(a: &[char], b: &[char]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    0.5 * lcs_ratio(a, b) + 0.5 * partial_ratio(a, b)
}

/// `2 * LCS / (|a| + |b|)`.
pub fn lcs_ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * lcs_len(a, b) as f64 / total as f64
}

fn partial_ratio(a: &[char], b: &[char]) -> f64 {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.len() == long.len() {
        return lcs_ratio(short, long);
    }

    // A window's character overlap with `short` bounds its LCS from above,
    // so windows are tried best bound first and the search stops once no
    // remaining window can win.
    let width = short.len();
    let bounds = window_overlaps(short, long);
    let mut starts: Vec<usize> = (0..bounds.len()).collect();
    starts.sort_by_key(|&start| std::cmp::Reverse(bounds[start]));

    let mut best = 0;
    for &start in starts.iter().take(MAX_SCORED_WINDOWS) {
        if bounds[start] <= best {
            break;
        }
        best = best.max(lcs_len(short, &long[start..start + width]));
        if best == width {
            break;
        }
    }
    best as f64 / width as f64
}

/// Multiset overlap between `short` and every `short.len()`-wide window of
/// `long`, indexed by window start.
fn window_overlaps(short: &[char], long: &[char]) -> Vec<usize> {
    let width = short.len();
    let mut wanted: HashMap<char, usize> = HashMap::new();
    for &ch in short {
        *wanted.entry(ch).or_default() += 1;
    }

    let mut held: HashMap<char, usize> = HashMap::new();
    let mut overlap = 0;
    let mut overlaps = Vec::with_capacity(long.len() + 1 - width);
    for (idx, &ch) in long.iter().enumerate() {
        if let Some(&want) = wanted.get(&ch) {
            let count = held.entry(ch).or_default();
            if *count < want {
                overlap += 1;
            }
            *count += 1;
        }
        if idx >= width {
            let gone = long[idx - width];
            if let Some(&want) = wanted.get(&gone) {
                let count = held.entry(gone).or_default();
                *count -= 1;
                if *count < want {
                    overlap -= 1;
                }
            }
        }
        if idx + 1 >= width {
            overlaps.push(overlap);
        }
    }
    overlaps
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

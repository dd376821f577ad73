//! # docquery
//!
//! Answers natural-language queries from a corpus of PDF and DOCX documents,
//! including scanned PDFs, and falls back to a generation service when the
//! documents have nothing to say.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌───────────┐   ┌──────────┐
//! │ DocumentStore│──▶│  TextCache  │──▶│  Matcher  │──▶│ Resolver │
//! │  (fs, ...)   │   │ + Extractor │   │exact/fuzzy│   │          │
//! └──────────────┘   │ + OCR pool  │   └───────────┘   └────┬─────┘
//!                    └─────────────┘                        │ no match
//!                                                           ▼
//!                                                    ┌────────────┐
//!                                                    │  Fallback  │
//!                                                    │ (OpenAI…)  │
//!                                                    └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dq preprocess                          # extract and cache every document
//! dq ask "what is the capital of France"
//! dq serve                               # POST /query on [server].bind
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Documents, extracted text, match candidates |
//! | [`error`] | Extraction, cache, and fallback error types |
//! | [`store`] | Read-only document storage |
//! | [`extract`] | PDF and DOCX text extraction |
//! | [`ocr`] | Page OCR and the bounded OCR worker pool |
//! | [`cache`] | Per-document extracted-text cache |
//! | [`matcher`] | Exact and fuzzy passage matching |
//! | [`fallback`] | Generation providers |
//! | [`resolver`] | Query pipeline and cache warm-up |
//! | [`progress`] | Preprocess progress on stderr |
//! | [`status`] | Cache freshness report |
//! | [`server`] | HTTP query endpoint |

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod matcher;
pub mod models;
pub mod ocr;
pub mod progress;
pub mod resolver;
pub mod server;
pub mod status;
pub mod store;

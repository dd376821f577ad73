//! TOML configuration.
//!
//! One [`Config`] is loaded at startup and handed to every component; nothing
//! reads paths or API keys from globals.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: u64,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.pdf".to_string(), "**/*.docx".to_string()]
}
fn default_max_document_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_true")]
    pub ocr_enabled: bool,
    /// Downscale factor applied to the render resolution before OCR.
    #[serde(default = "default_ocr_scale")]
    pub ocr_scale: f32,
    #[serde(default = "default_render_dpi")]
    pub render_dpi: u32,
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
    /// 0 means one worker per available CPU core.
    #[serde(default)]
    pub ocr_workers: usize,
    #[serde(default = "default_page_timeout_secs")]
    pub page_timeout_secs: u64,
    #[serde(default = "default_document_timeout_secs")]
    pub document_timeout_secs: u64,
    #[serde(default = "default_pdftoppm_bin")]
    pub pdftoppm_bin: String,
    #[serde(default = "default_tesseract_bin")]
    pub tesseract_bin: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ocr_enabled: true,
            ocr_scale: default_ocr_scale(),
            render_dpi: default_render_dpi(),
            ocr_language: default_ocr_language(),
            ocr_workers: 0,
            page_timeout_secs: default_page_timeout_secs(),
            document_timeout_secs: default_document_timeout_secs(),
            pdftoppm_bin: default_pdftoppm_bin(),
            tesseract_bin: default_tesseract_bin(),
        }
    }
}

impl ExtractionConfig {
    /// Number of concurrent OCR page tasks.
    pub fn worker_count(&self) -> usize {
        if self.ocr_workers > 0 {
            return self.ocr_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Resolution pages are rendered at for OCR.
    pub fn effective_dpi(&self) -> u32 {
        ((self.render_dpi as f32 * self.ocr_scale).round() as u32).max(36)
    }
}

fn default_true() -> bool {
    true
}
fn default_ocr_scale() -> f32 {
    0.5
}
fn default_render_dpi() -> u32 {
    300
}
fn default_ocr_language() -> String {
    "eng".to_string()
}
fn default_page_timeout_secs() -> u64 {
    60
}
fn default_document_timeout_secs() -> u64 {
    300
}
fn default_pdftoppm_bin() -> String {
    "pdftoppm".to_string()
}
fn default_tesseract_bin() -> String {
    "tesseract".to_string()
}

/// Whether the exact phase reports every matching document or stops at the first.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExactMode {
    #[default]
    All,
    First,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    #[serde(default)]
    pub exact_mode: ExactMode,
    /// Width of an exact-match snippet, in characters.
    #[serde(default = "default_snippet_width")]
    pub snippet_width: usize,
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    /// Characters of surrounding text added on each side of a fuzzy paragraph.
    #[serde(default = "default_context_radius")]
    pub context_radius: usize,
    #[serde(default = "default_max_fuzzy_results")]
    pub max_fuzzy_results: usize,
    #[serde(default = "default_question_prefixes")]
    pub question_prefixes: Vec<String>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            exact_mode: ExactMode::All,
            snippet_width: default_snippet_width(),
            fuzzy_threshold: default_fuzzy_threshold(),
            context_radius: default_context_radius(),
            max_fuzzy_results: default_max_fuzzy_results(),
            question_prefixes: default_question_prefixes(),
        }
    }
}

fn default_snippet_width() -> usize {
    200
}
fn default_fuzzy_threshold() -> f64 {
    0.5
}
fn default_context_radius() -> usize {
    200
}
fn default_max_fuzzy_results() -> usize {
    3
}
fn default_question_prefixes() -> Vec<String> {
    [
        "what is",
        "what are",
        "define",
        "explain",
        "tell me about",
        "describe",
        "how to",
        "why is",
        "list",
        "give me",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FallbackConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
        }
    }
}

impl FallbackConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_max_tokens() -> u32 {
    500
}
fn default_temperature() -> f32 {
    0.7
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Environment variable holding the shared secret for `Authorization`.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_key_env: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// Config rooted at `root` with every other setting defaulted.
    pub fn with_dirs(store_root: &Path, cache_dir: &Path) -> Self {
        Self {
            store: StoreConfig {
                root: store_root.to_path_buf(),
                include_globs: default_include_globs(),
                exclude_globs: Vec::new(),
                follow_symlinks: false,
                max_document_bytes: default_max_document_bytes(),
            },
            cache: CacheConfig {
                dir: cache_dir.to_path_buf(),
            },
            extraction: ExtractionConfig::default(),
            matching: MatchingConfig::default(),
            fallback: FallbackConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let ocr_scale = config.extraction.ocr_scale;
    if !(ocr_scale > 0.0 && ocr_scale <= 1.0) {
        anyhow::bail!("extraction.ocr_scale must be in (0.0, 1.0]");
    }
    if config.extraction.render_dpi == 0 {
        anyhow::bail!("extraction.render_dpi must be > 0");
    }

    if config.matching.snippet_width == 0 {
        anyhow::bail!("matching.snippet_width must be > 0");
    }
    if !(0.0..=1.0).contains(&config.matching.fuzzy_threshold) {
        anyhow::bail!("matching.fuzzy_threshold must be in [0.0, 1.0]");
    }
    if config.matching.max_fuzzy_results == 0 {
        anyhow::bail!("matching.max_fuzzy_results must be >= 1");
    }

    match config.fallback.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown fallback provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.fallback.temperature) {
        anyhow::bail!("fallback.temperature must be in [0.0, 2.0]");
    }

    Ok(())
}

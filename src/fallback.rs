//! Generation fallback used when no document matches a query.
//!
//! Defines the [`GenerationProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: always fails with [`FallbackError::Disabled`].
//! - **[`OpenAiChatProvider`]**: calls an OpenAI-compatible
//!   `POST /chat/completions` endpoint.
//!
//! Providers classify failures into quota, timeout, transport, and provider
//! errors so the resolver can pick a stable user-facing message. No retries
//! happen here; a caller that wants backoff wraps the provider.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::FallbackConfig;
use crate::error::FallbackError;

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Provider identifier for logs (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Complete `prompt`, returning the generated text.
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, FallbackError>;
}

/// Instantiate the provider named by `config.provider`.
pub fn create_provider(config: &FallbackConfig) -> anyhow::Result<Arc<dyn GenerationProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAiChatProvider::new(config)?)),
        other => anyhow::bail!("Unknown fallback provider: {}", other),
    }
}

// ============ Disabled Provider ============

pub struct DisabledProvider;

#[async_trait]
impl GenerationProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String, FallbackError> {
        Err(FallbackError::Disabled)
    }
}

// ============ OpenAI Provider ============

/// Chat-completions client for OpenAI or any compatible endpoint.
///
/// The API key is read from the environment variable named by
/// `fallback.api_key_env` when the provider is built.
pub struct OpenAiChatProvider {
    client: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    timeout_secs: u64,
}

impl OpenAiChatProvider {
    pub fn new(config: &FallbackConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;
        Self::with_key(config, api_key)
    }

    pub fn with_key(config: &FallbackConfig, api_key: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAiChatProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, FallbackError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| classify_transport(e, self.timeout_secs))?;
        parse_chat_response(&json)
    }
}

fn classify_transport(err: reqwest::Error, timeout_secs: u64) -> FallbackError {
    if err.is_timeout() {
        FallbackError::Timeout(timeout_secs)
    } else if err.is_decode() {
        FallbackError::Provider(err.to_string())
    } else {
        FallbackError::Transport(err.to_string())
    }
}

/// Maps a non-success HTTP status to a fallback error.
fn classify_status(status: u16, body: &str) -> FallbackError {
    match status {
        429 => FallbackError::Quota(body.to_string()),
        402 => FallbackError::Quota(body.to_string()),
        408 | 504 => FallbackError::Timeout(0),
        _ => FallbackError::Provider(format!("HTTP {}: {}", status, body)),
    }
}

/// Extracts `choices[0].message.content` from a chat-completions response.
fn parse_chat_response(json: &serde_json::Value) -> Result<String, FallbackError> {
    let content = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            FallbackError::Provider(
                "Invalid chat response: missing choices[0].message.content".to_string(),
            )
        })?;

    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(FallbackError::Provider("empty completion".to_string()));
    }
    Ok(trimmed.to_string())
}

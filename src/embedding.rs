//! Embedding provider implementations.
//!
//! Implements the core [`EmbeddingProvider`] trait for:
//! - **[`DisabledProvider`]**: every call fails with [`KbError::Disabled`].
//! - **[`OpenAIProvider`]**: `POST {url}/embeddings` on an OpenAI-compatible API.
//! - **[`OllamaProvider`]**: `POST {url}/api/embed` on a local Ollama instance.
//! - `hash`: the core crate's offline [`FeatureHashProvider`].
//!
//! # Provider Selection
//!
//! [`create_provider`] maps `[embedding] provider` to a backend:
//!
//! ```rust,no_run
//! # use compliance_kb::config::EmbeddingConfig;
//! # use compliance_kb::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```
//!
//! # Retry Strategy
//!
//! The network providers retry transient errors with exponential backoff:
//! - HTTP 429 (rate limited), 5xx, and network errors → retry
//! - HTTP 401/403 → [`KbError::Auth`], no retry
//! - Other HTTP 4xx → [`KbError::Rejected`], no retry
//!
//! Whether to retry is decided by [`KbError::is_transient`].
//! - Backoff: `base_backoff_ms × 2^(attempt − 1)`, i.e. 2s, 4s by default

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use compliance_kb_core::embedding::{truncate_chars, EmbeddingProvider, FeatureHashProvider};
use compliance_kb_core::KbError;

use crate::config::EmbeddingConfig;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

// ============ Disabled Provider ============

/// Stand-in for an unconfigured KB. Every `embed` call is an error, so
/// ingestion refuses to start and citation lookups come back empty.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, KbError> {
        Err(KbError::Disabled)
    }
}

// ============ Retry ============

/// Retry budget for one embedding call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff: Duration::from_millis(config.base_backoff_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1).min(16))
    }
}

/// POST `body` to `url` and return the JSON response, retrying per `policy`.
async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    policy: &RetryPolicy,
    label: &str,
) -> Result<serde_json::Value, KbError> {
    let mut last_err = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.backoff(attempt);
            let reason = last_err.as_ref().map(ToString::to_string).unwrap_or_default();
            tracing::warn!(
                provider = label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %reason,
                "retrying embedding request"
            );
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let err = match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| KbError::Provider(format!("{label} returned invalid JSON: {e}")));
                }
                let body_text = response.text().await.unwrap_or_default();
                status_error(status, &body_text, label, attempt + 1)
            }
            Err(e) => KbError::Provider(format!("{label} request failed: {e}")),
        };

        if !err.is_transient() {
            return Err(err);
        }
        last_err = Some(err);
    }

    Err(last_err.unwrap_or_else(|| KbError::Provider(format!("{label} embedding failed after retries"))))
}

/// Map a non-success response to the error the retry loop acts on.
fn status_error(status: reqwest::StatusCode, body: &str, label: &str, attempts: u32) -> KbError {
    let detail = format!("{label} API error {status}: {body}");
    match status.as_u16() {
        401 | 403 => KbError::Auth(detail),
        429 => KbError::RateLimited { attempts },
        _ if status.is_server_error() => KbError::Provider(detail),
        _ => KbError::Rejected(detail),
    }
}

fn check_dims(vec: Vec<f32>, dims: usize, label: &str) -> Result<Vec<f32>, KbError> {
    if vec.len() != dims {
        return Err(KbError::Provider(format!(
            "{label} returned {} dimensions, expected {dims}",
            vec.len()
        )));
    }
    Ok(vec)
}

fn json_to_vec(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()
        .map(|arr| arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

fn config_error(message: &str) -> anyhow::Error {
    KbError::Config(message.to_string()).into()
}

fn build_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

// ============ OpenAI Provider ============

/// OpenAI-compatible `POST {url}/embeddings` backend.
///
/// The bearer token comes from `OPENAI_API_KEY` unless supplied through
/// [`OpenAIProvider::with_api_key`].
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    url: String,
    /// e.g. `text-embedding-3-small`
    model: String,
    /// Expected response length; other lengths are rejected.
    dims: usize,
    max_input_chars: usize,
    retry: RetryPolicy,
}

impl OpenAIProvider {
    /// Fails without `model`, `dims`, or an `OPENAI_API_KEY` in the
    /// environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ => return Err(config_error("OPENAI_API_KEY environment variable not set")),
        };
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| config_error("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| config_error("embedding.dims required for OpenAI provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());

        Ok(Self {
            client: build_client(config)?,
            api_key,
            url: url.trim_end_matches('/').to_string(),
            model,
            dims,
            max_input_chars: config.max_input_chars,
            retry: RetryPolicy::from_config(config),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, KbError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": truncate_chars(text, self.max_input_chars),
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/embeddings", self.url),
            Some(&self.api_key),
            &body,
            &self.retry,
            "OpenAI",
        )
        .await?;
        check_dims(parse_openai_response(&json)?, self.dims, "OpenAI")
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>, KbError> {
    json.get("data")
        .and_then(|d| d.as_array())
        .and_then(|data| data.first())
        .and_then(|item| item.get("embedding"))
        .and_then(json_to_vec)
        .ok_or_else(|| KbError::Provider("Invalid OpenAI response: missing embedding".into()))
}

// ============ Ollama Provider ============

/// Local Ollama backend via `POST {url}/api/embed`.
///
/// `url` defaults to `http://localhost:11434`; the model must already be
/// pulled on that instance.
pub struct OllamaProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    max_input_chars: usize,
    retry: RetryPolicy,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| config_error("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| config_error("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

        Ok(Self {
            client: build_client(config)?,
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            max_input_chars: config.max_input_chars,
            retry: RetryPolicy::from_config(config),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, KbError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": truncate_chars(text, self.max_input_chars),
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/embed", self.url),
            None,
            &body,
            &self.retry,
            "Ollama",
        )
        .await?;
        check_dims(parse_ollama_response(&json)?, self.dims, "Ollama")
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>, KbError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|arr| arr.first())
        .and_then(json_to_vec)
        .ok_or_else(|| KbError::Provider("Invalid Ollama response: missing embeddings array".into()))
}

/// Build the provider named by `config.provider`.
///
/// Unknown names and incomplete provider settings are errors.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        "hash" => {
            let dims = config
                .dims
                .ok_or_else(|| config_error("embedding.dims required for hash provider"))?;
            Ok(Arc::new(FeatureHashProvider::new(dims)))
        }
        other => Err(config_error(&format!("Unknown embedding provider: {other}"))),
    }
}

//! TOML configuration for the compliance knowledge base.
//!
//! Every section except `[db]` has defaults, so a minimal config file only
//! needs the database path. Without `[db]` the knowledge base is treated as
//! unconfigured: packs still run, citations stay empty, and search reports
//! "not configured".

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use compliance_kb_core::chunk::{DEFAULT_OVERLAP_TOKENS, DEFAULT_TARGET_TOKENS};
use compliance_kb_core::citation::{
    CitationOptions, DEFAULT_CITATION_K, DEFAULT_CITATION_MIN_SIMILARITY, DEFAULT_MAX_QUERY_CHARS,
};
use compliance_kb_core::embedding::DEFAULT_MAX_INPUT_CHARS;
use compliance_kb_core::models::Criticality;
use compliance_kb_core::score::ScoringPolicy;
use compliance_kb_core::search::{DEFAULT_K, DEFAULT_KEYWORD_WEIGHT};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: Option<DbConfig>,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub citations: CitationsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub scoring: ScoringPolicy,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub packs: BTreeMap<String, PackConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: DEFAULT_TARGET_TOKENS,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
        }
    }
}

fn default_target_tokens() -> usize {
    DEFAULT_TARGET_TOKENS
}
fn default_overlap_tokens() -> usize {
    DEFAULT_OVERLAP_TOKENS
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default)]
    pub min_similarity: f64,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default = "default_retrieval_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: DEFAULT_K,
            min_similarity: 0.0,
            keyword_weight: DEFAULT_KEYWORD_WEIGHT,
            timeout_secs: 20,
        }
    }
}

fn default_k() -> usize {
    DEFAULT_K
}
fn default_keyword_weight() -> f64 {
    DEFAULT_KEYWORD_WEIGHT
}
fn default_retrieval_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct CitationsConfig {
    #[serde(default = "default_citation_k")]
    pub k: usize,
    #[serde(default = "default_citation_min_similarity")]
    pub min_similarity: f64,
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for CitationsConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_CITATION_K,
            min_similarity: DEFAULT_CITATION_MIN_SIMILARITY,
            max_query_chars: DEFAULT_MAX_QUERY_CHARS,
            concurrency: 4,
        }
    }
}

impl CitationsConfig {
    pub fn options(&self) -> CitationOptions {
        CitationOptions {
            k: self.k,
            min_similarity: self.min_similarity,
            max_query_chars: self.max_query_chars,
        }
    }
}

fn default_citation_k() -> usize {
    DEFAULT_CITATION_K
}
fn default_citation_min_similarity() -> f64 {
    DEFAULT_CITATION_MIN_SIMILARITY
}
fn default_max_query_chars() -> usize {
    DEFAULT_MAX_QUERY_CHARS
}
fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible endpoint or Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Delay between consecutive embedding calls during ingestion.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            max_retries: 2,
            base_backoff_ms: 2000,
            timeout_secs: 30,
            throttle_ms: 100,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_input_chars() -> usize {
    DEFAULT_MAX_INPUT_CHARS
}
fn default_max_retries() -> u32 {
    2
}
fn default_base_backoff_ms() -> u64 {
    2000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_throttle_ms() -> u64 {
    100
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

/// A keyword-rule compliance pack, declared under `[packs.<id>]`.
#[derive(Debug, Deserialize, Clone)]
pub struct PackConfig {
    pub version: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuleConfig {
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub criticality: u8,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
}

impl Config {
    /// The KB is usable only with both a database and an embedding provider.
    pub fn kb_configured(&self) -> bool {
        self.db.is_some() && self.embedding.is_enabled()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.target_tokens == 0 {
        bail!("chunking.target_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.target_tokens {
        bail!("chunking.overlap_tokens must be < chunking.target_tokens");
    }

    // Validate retrieval
    if config.retrieval.default_k < 1 {
        bail!("retrieval.default_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.min_similarity) {
        bail!("retrieval.min_similarity must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.retrieval.keyword_weight) {
        bail!("retrieval.keyword_weight must be in [0.0, 1.0]");
    }

    // Validate citations
    if config.citations.k < 1 {
        bail!("citations.k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.citations.min_similarity) {
        bail!("citations.min_similarity must be in [0.0, 1.0]");
    }
    if config.citations.concurrency < 1 {
        bail!("citations.concurrency must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "hash" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or hash.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.provider != "hash" && config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.max_input_chars == 0 {
        bail!("embedding.max_input_chars must be > 0");
    }

    // Validate scoring
    config.scoring.validate().map_err(anyhow::Error::msg)?;

    // Validate packs
    for (id, pack) in &config.packs {
        if pack.version.trim().is_empty() {
            bail!("packs.{id}.version must not be empty");
        }
        for rule in &pack.rules {
            Criticality::try_from(rule.criticality)
                .map_err(|e| anyhow::anyhow!("packs.{id}.rules.{}: {e}", rule.key))?;
            if rule.keywords.iter().all(|k| k.trim().is_empty()) {
                bail!("packs.{id}.rules.{}: keywords must not be empty", rule.key);
            }
        }
    }

    Ok(())
}

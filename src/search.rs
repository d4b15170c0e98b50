//! Knowledge-base search shared by the CLI and the HTTP server.
//!
//! Wraps the core [`Retriever`] with the application concerns: opening the
//! SQLite store, choosing between semantic, hybrid, and article lookup,
//! and enforcing `retrieval.timeout_secs`.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;

use compliance_kb_core::models::SearchResult;
use compliance_kb_core::search::{Retriever, SearchQuery};
use compliance_kb_core::store::VectorStore;
use compliance_kb_core::KbError;

use crate::config::{Config, RetrievalConfig};
use crate::db;
use crate::embedding::create_provider;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

/// Characters of chunk text shown in a preview.
pub const PREVIEW_CHARS: usize = 200;

/// Open the configured store and provider.
///
/// Returns `Ok(None)` when the knowledge base is not configured (no `[db]`
/// section or a disabled provider).
pub async fn open_retriever(config: &Config) -> Result<Option<Retriever>> {
    if !config.kb_configured() {
        return Ok(None);
    }
    let provider = create_provider(&config.embedding)?;
    let store = open_store(config).await?;
    Ok(Some(Retriever::new(store, provider)))
}

/// Connect to `[db]` and bring its schema up to date.
pub async fn open_store(config: &Config) -> Result<Arc<dyn VectorStore>> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

/// One search invocation, as the CLI and HTTP layers parse it.
#[derive(Debug, Clone, Default)]
pub struct KbSearchRequest {
    pub pack_id: String,
    pub version: String,
    pub query: String,
    /// Exact article lookup; takes precedence over `query`.
    pub article: Option<String>,
    pub k: Option<usize>,
    pub min_similarity: Option<f64>,
    /// Non-empty enables the hybrid keyword boost.
    pub keywords: Vec<String>,
}

/// Run `req` against `retriever`, bounded by `retrieval.timeout_secs`.
pub async fn search_kb(
    retriever: &Retriever,
    retrieval: &RetrievalConfig,
    req: &KbSearchRequest,
) -> Result<Vec<SearchResult>, KbError> {
    if req.pack_id.trim().is_empty() || req.version.trim().is_empty() {
        return Err(KbError::InvalidQuery("pack and version are required".into()));
    }

    let timeout = Duration::from_secs(retrieval.timeout_secs);
    let fut = async {
        if let Some(article) = req.article.as_deref().filter(|a| !a.trim().is_empty()) {
            return retriever.lookup_article(&req.pack_id, &req.version, article).await;
        }
        let q = SearchQuery {
            pack_id: &req.pack_id,
            version: &req.version,
            query: &req.query,
            k: req.k.unwrap_or(retrieval.default_k),
            min_similarity: req.min_similarity.unwrap_or(retrieval.min_similarity),
        };
        tracing::debug!(pack = %req.pack_id, version = %req.version, k = q.k, "kb search");
        if req.keywords.is_empty() {
            retriever.search(&q).await
        } else {
            retriever
                .search_hybrid(&q, &req.keywords, retrieval.keyword_weight)
                .await
        }
    };

    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(KbError::Timeout(timeout)),
    }
}

/// Split a comma-separated keyword list, dropping blanks.
pub fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

/// First [`PREVIEW_CHARS`] characters of `text`, with `…` when truncated.
pub fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

/// `ckb search` entry point.
pub async fn run_search(config: &Config, req: KbSearchRequest) -> Result<()> {
    if req.query.trim().is_empty() && req.article.is_none() {
        println!("No results.");
        return Ok(());
    }

    let Some(retriever) = open_retriever(config).await? else {
        bail!("Knowledge base is not configured. Set [db] and an [embedding] provider in the config.");
    };

    let results = search_kb(&retriever, &config.retrieval, &req).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let article = result
            .article
            .as_deref()
            .map(|a| format!(" art. {a}"))
            .unwrap_or_default();
        println!(
            "{}. [{:.2}] {}{}",
            i + 1,
            result.similarity,
            result.reg_code,
            article
        );
        if let Some(ref section) = result.section {
            println!("    section: {}", section);
        }
        if let Some(date) = result.published_at {
            println!("    published: {}", date);
        }
        println!("    url: {}", result.url);
        println!("    excerpt: \"{}\"", preview(&result.text).replace('\n', " ").trim());
        println!("    id: {}", result.id);
        println!();
    }

    Ok(())
}

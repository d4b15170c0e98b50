//! Best-effort citation attachment for checklist items.
//!
//! A [`CitationAttacher`] turns an item's title and description into a
//! retrieval query and attaches the closest knowledge-base chunks as
//! [`CitationRef`]s. Attachment never fails: a disabled attacher or any
//! retrieval error leaves the item with an empty citation list.

use crate::embedding::truncate_chars;
use crate::models::{ChecklistItem, CitationRef};
use crate::search::{Retriever, SearchQuery};

/// Default number of citations per item.
pub const DEFAULT_CITATION_K: usize = 2;
/// Default confidence floor.
pub const DEFAULT_CITATION_MIN_SIMILARITY: f64 = 0.65;
/// Default query length cap, in characters.
pub const DEFAULT_MAX_QUERY_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct CitationOptions {
    pub k: usize,
    pub min_similarity: f64,
    pub max_query_chars: usize,
}

impl Default for CitationOptions {
    fn default() -> Self {
        Self {
            k: DEFAULT_CITATION_K,
            min_similarity: DEFAULT_CITATION_MIN_SIMILARITY,
            max_query_chars: DEFAULT_MAX_QUERY_CHARS,
        }
    }
}

/// The `(pack_id, version)` slice citations are drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationScope {
    pub pack_id: String,
    pub version: String,
}

impl CitationScope {
    pub fn new(pack_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            pack_id: pack_id.into(),
            version: version.into(),
        }
    }
}

#[derive(Clone)]
pub struct CitationAttacher {
    retriever: Option<Retriever>,
    opts: CitationOptions,
}

impl CitationAttacher {
    pub fn new(retriever: Retriever, opts: CitationOptions) -> Self {
        Self {
            retriever: Some(retriever),
            opts,
        }
    }

    /// An attacher for an unconfigured knowledge base. Always attaches nothing.
    pub fn disabled(opts: CitationOptions) -> Self {
        Self {
            retriever: None,
            opts,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.retriever.is_some()
    }

    pub fn options(&self) -> &CitationOptions {
        &self.opts
    }

    /// `title + " " + description`, trimmed and capped at `max_query_chars`.
    pub fn build_query(&self, item: &ChecklistItem) -> String {
        let joined = format!("{} {}", item.title, item.description);
        truncate_chars(joined.trim(), self.opts.max_query_chars).to_string()
    }

    /// Citations for one item. Errors are logged and yield an empty list.
    pub async fn citations_for(&self, scope: &CitationScope, item: &ChecklistItem) -> Vec<CitationRef> {
        let Some(retriever) = &self.retriever else {
            return Vec::new();
        };

        let query = self.build_query(item);
        let q = SearchQuery {
            pack_id: &scope.pack_id,
            version: &scope.version,
            query: &query,
            k: self.opts.k,
            min_similarity: self.opts.min_similarity,
        };
        match retriever.search(&q).await {
            Ok(results) => results
                .into_iter()
                .filter(|r| r.similarity >= self.opts.min_similarity)
                .take(self.opts.k)
                .map(CitationRef::from)
                .collect(),
            Err(e) => {
                tracing::warn!(
                    item = %item.key,
                    pack = %scope.pack_id,
                    version = %scope.version,
                    error = %e,
                    "citation lookup failed"
                );
                Vec::new()
            }
        }
    }

    /// Return `item` with its `citations` replaced. No other field changes.
    pub async fn attach(&self, scope: &CitationScope, mut item: ChecklistItem) -> ChecklistItem {
        item.citations = self.citations_for(scope, &item).await;
        item
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::embedding::{EmbeddingProvider, FeatureHashProvider};
    use crate::error::KbError;
    use crate::models::{CheckStatus, Chunk, Criticality, Source};
    use crate::store::memory::InMemoryStore;
    use crate::store::VectorStore;

    struct RateLimitedProvider;

    #[async_trait]
    impl EmbeddingProvider for RateLimitedProvider {
        fn model_name(&self) -> &str {
            "limited"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, KbError> {
            Err(KbError::RateLimited { attempts: 3 })
        }
    }

    fn item(title: &str, description: &str) -> ChecklistItem {
        ChecklistItem::new(
            "wage-protection",
            title,
            description,
            CheckStatus::Warn,
            Criticality::try_from(4).unwrap(),
        )
    }

    async fn attacher_with(texts: &[&str], opts: CitationOptions) -> CitationAttacher {
        let provider = Arc::new(FeatureHashProvider::new(256));
        let store = Arc::new(InMemoryStore::new());
        let mut chunks = Vec::new();
        let mut vectors = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            vectors.push(provider.embed(text).await.unwrap());
            chunks.push(Chunk {
                text: text.to_string(),
                section: Some(format!("Article {}", i + 1)),
                article: Some((i + 1).to_string()),
                token_count: 10,
            });
        }
        let source = Source {
            id: "s1".into(),
            title: "Labor Law".into(),
            url: "https://example.gov/ll".into(),
            reg_code: "LL-2005".into(),
            published_at: None,
            pack_id: "labor".into(),
            version: "v1".into(),
        };
        store.replace_source(&source, &chunks, &vectors).await.unwrap();
        CitationAttacher::new(Retriever::new(store, provider), opts)
    }

    #[test]
    fn test_build_query_truncates() {
        let attacher = CitationAttacher::disabled(CitationOptions::default());
        let long = "x".repeat(600);
        let q = attacher.build_query(&item("Title", &long));
        assert_eq!(q.chars().count(), 500);
        assert!(q.starts_with("Title x"));
    }

    #[tokio::test]
    async fn test_disabled_attacher_returns_empty() {
        let attacher = CitationAttacher::disabled(CitationOptions::default());
        let scope = CitationScope::new("labor", "v1");
        let out = attacher.attach(&scope, item("Wages", "paid monthly")).await;
        assert!(out.citations.is_empty());
        assert_eq!(out.status, CheckStatus::Warn);
    }

    #[tokio::test]
    async fn test_citations_capped_and_above_floor() {
        let text = "Wage protection payment monthly";
        let attacher = attacher_with(
            &[text, text, text, "Fire exits must remain unobstructed."],
            CitationOptions::default(),
        )
        .await;
        let scope = CitationScope::new("labor", "v1");
        let out = attacher
            .attach(&scope, item("Wage protection", "payment monthly"))
            .await;
        assert_eq!(out.citations.len(), 2);
        assert!(out.citations.iter().all(|c| c.confidence >= 0.65));
        assert_eq!(out.citations[0].reg_code, "LL-2005");
    }

    #[tokio::test]
    async fn test_unrelated_chunks_not_cited() {
        let attacher = attacher_with(
            &["Fire exits must remain unobstructed."],
            CitationOptions::default(),
        )
        .await;
        let scope = CitationScope::new("labor", "v1");
        let out = attacher.attach(&scope, item("Wage protection", "payment")).await;
        assert!(out.citations.is_empty());
    }

    #[tokio::test]
    async fn test_retrieval_error_yields_empty() {
        let retriever = Retriever::new(Arc::new(InMemoryStore::new()), Arc::new(RateLimitedProvider));
        let attacher = CitationAttacher::new(retriever, CitationOptions::default());
        let scope = CitationScope::new("labor", "v1");
        let original = item("Wages", "paid monthly");
        let out = attacher.attach(&scope, original.clone()).await;
        assert!(out.citations.is_empty());
        assert_eq!(out.key, original.key);
        assert_eq!(out.description, original.description);
    }
}

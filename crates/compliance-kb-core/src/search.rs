//! Retrieval over the compliance knowledge base.
//!
//! The [`Retriever`] operates entirely through the [`VectorStore`] and
//! [`EmbeddingProvider`] traits, with no database or configuration
//! dependencies. The calling application constructs the concrete backends
//! and decides on timeouts.
//!
//! # Modes
//!
//! - **Semantic**: embed the query, scan the `(pack_id, version)` slice,
//!   keep results at or above `min_similarity`, cap at `k`.
//! - **Hybrid**: semantic results re-ranked by
//!   `(1 - w) × similarity + w × keyword_score`, where `keyword_score` is
//!   the fraction of keywords found in the chunk text. `min_similarity`
//!   applies to the blended score as well.
//! - **Article lookup**: exact match on the extracted article identifier,
//!   similarity fixed at `1.0`, no embedding call.

use std::sync::Arc;

use crate::embedding::{truncate_chars, EmbeddingProvider};
use crate::error::KbError;
use crate::models::SearchResult;
use crate::store::{VectorQuery, VectorStore};

/// Default number of results.
pub const DEFAULT_K: usize = 10;
/// Default weight of the keyword score in hybrid mode.
pub const DEFAULT_KEYWORD_WEIGHT: f64 = 0.3;

/// Bundles all inputs for a single semantic search.
#[derive(Debug, Clone)]
pub struct SearchQuery<'a> {
    pub pack_id: &'a str,
    pub version: &'a str,
    pub query: &'a str,
    pub k: usize,
    /// Similarity floor in `[0.0, 1.0]`.
    pub min_similarity: f64,
}

impl<'a> SearchQuery<'a> {
    /// A query with `k = 10` and no similarity floor.
    pub fn new(pack_id: &'a str, version: &'a str, query: &'a str) -> Self {
        Self {
            pack_id,
            version,
            query,
            k: DEFAULT_K,
            min_similarity: 0.0,
        }
    }
}

/// Embeds queries and runs them against a vector store.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Semantic search, ordered by descending similarity.
    ///
    /// A blank query or `k = 0` returns no results without touching the
    /// provider. Provider and store failures propagate.
    pub async fn search(&self, q: &SearchQuery<'_>) -> Result<Vec<SearchResult>, KbError> {
        if !(0.0..=1.0).contains(&q.min_similarity) {
            return Err(KbError::InvalidQuery(format!(
                "min_similarity must be between 0.0 and 1.0, got {}",
                q.min_similarity
            )));
        }
        if q.query.trim().is_empty() || q.k == 0 {
            return Ok(Vec::new());
        }

        let text = truncate_chars(q.query, self.embedder.max_input_chars());
        let embedding = self.embedder.embed(text).await?;

        let mut results = self
            .store
            .vector_search(&VectorQuery {
                pack_id: q.pack_id,
                version: q.version,
                embedding: &embedding,
                limit: q.k,
                min_similarity: q.min_similarity,
            })
            .await
            .map_err(KbError::store)?;

        for r in &mut results {
            r.similarity = r.similarity.clamp(0.0, 1.0);
        }
        results.retain(|r| r.similarity >= q.min_similarity);
        results.truncate(q.k);
        Ok(results)
    }

    /// [`search`](Self::search) followed by [`apply_keyword_boost`].
    ///
    /// Results whose blended score drops below `min_similarity` are removed.
    pub async fn search_hybrid(
        &self,
        q: &SearchQuery<'_>,
        keywords: &[String],
        keyword_weight: f64,
    ) -> Result<Vec<SearchResult>, KbError> {
        let results = self.search(q).await?;
        let mut results = apply_keyword_boost(results, keywords, keyword_weight);
        results.retain(|r| r.similarity >= q.min_similarity);
        Ok(results)
    }

    /// Every chunk in the slice whose article equals `article`.
    pub async fn lookup_article(
        &self,
        pack_id: &str,
        version: &str,
        article: &str,
    ) -> Result<Vec<SearchResult>, KbError> {
        let article = article.trim();
        if article.is_empty() {
            return Ok(Vec::new());
        }
        self.store
            .find_by_article(pack_id, version, article)
            .await
            .map_err(KbError::store)
    }
}

/// Fraction of `keywords` that appear in `text`, case-insensitively.
pub fn keyword_score(text: &str, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let haystack = text.to_lowercase();
    let hits = keywords
        .iter()
        .filter(|k| haystack.contains(&k.to_lowercase()))
        .count();
    (hits as f64 / keywords.len() as f64).clamp(0.0, 1.0)
}

/// Re-rank results by blending similarity with a keyword score.
///
/// `similarity := (1 - w) × similarity + w × keyword_score`, then a stable
/// descending sort. Blank keywords are ignored; with none left the results
/// are returned unchanged.
pub fn apply_keyword_boost(
    mut results: Vec<SearchResult>,
    keywords: &[String],
    keyword_weight: f64,
) -> Vec<SearchResult> {
    let keywords: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        return results;
    }

    let w = keyword_weight.clamp(0.0, 1.0);
    for r in &mut results {
        let boosted = (1.0 - w) * r.similarity + w * keyword_score(&r.text, &keywords);
        r.similarity = boosted.clamp(0.0, 1.0);
    }
    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::FeatureHashProvider;
    use crate::models::{Chunk, Source};
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;

    fn result(id: &str, text: &str, similarity: f64) -> SearchResult {
        SearchResult {
            id: id.into(),
            text: text.into(),
            reg_code: "LL".into(),
            article: None,
            section: None,
            url: "https://example.gov".into(),
            version: "v1".into(),
            published_at: None,
            similarity,
        }
    }

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, KbError> {
            Err(KbError::Auth("401 Unauthorized".into()))
        }
    }

    async fn seeded() -> Retriever {
        let provider = Arc::new(FeatureHashProvider::new(256));
        let store = Arc::new(InMemoryStore::new());
        let texts = [
            ("Wages shall be paid monthly by bank transfer.", Some("12")),
            ("Annual leave is thirty calendar days.", Some("29")),
            ("Fire exits must remain unobstructed.", None),
        ];
        let mut chunks = Vec::new();
        let mut vectors = Vec::new();
        for (text, article) in texts {
            vectors.push(provider.embed(text).await.unwrap());
            chunks.push(Chunk {
                text: text.into(),
                section: None,
                article: article.map(str::to_string),
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
        Retriever::new(store, provider)
    }

    #[test]
    fn test_keyword_score_fraction() {
        assert_eq!(keyword_score("Wages and Leave", &kw(&["wages", "leave"])), 1.0);
        assert_eq!(keyword_score("Wages only", &kw(&["wages", "leave"])), 0.5);
        assert_eq!(keyword_score("nothing", &kw(&[])), 0.0);
    }

    #[test]
    fn test_keyword_boost_reorders() {
        let results = vec![result("a", "fire exits", 0.8), result("b", "wage payment", 0.7)];
        let boosted = apply_keyword_boost(results, &kw(&["wage"]), 0.3);
        assert_eq!(boosted[0].id, "b");
        assert!((boosted[0].similarity - (0.7 * 0.7 + 0.3)).abs() < 1e-9);
        assert!((boosted[1].similarity - 0.8 * 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_boost_empty_keywords_unchanged() {
        let results = vec![result("a", "x", 0.4), result("b", "y", 0.9)];
        let same = apply_keyword_boost(results.clone(), &kw(&["", "  "]), 0.3);
        assert_eq!(same, results);
    }

    #[test]
    fn test_keyword_boost_stable_on_ties() {
        let results = vec![result("a", "wage", 0.5), result("b", "wage", 0.5)];
        let boosted = apply_keyword_boost(results, &kw(&["wage"]), 0.3);
        assert_eq!(boosted[0].id, "a");
        assert_eq!(boosted[1].id, "b");
    }

    #[tokio::test]
    async fn test_search_blank_and_zero_k() {
        let retriever = seeded().await;
        assert!(retriever.search(&SearchQuery::new("labor", "v1", "   ")).await.unwrap().is_empty());
        let mut q = SearchQuery::new("labor", "v1", "wages");
        q.k = 0;
        assert!(retriever.search(&q).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_rejects_bad_threshold() {
        let retriever = seeded().await;
        let mut q = SearchQuery::new("labor", "v1", "wages");
        q.min_similarity = 1.5;
        assert!(matches!(retriever.search(&q).await, Err(KbError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_search_exact_text_ranks_first() {
        let retriever = seeded().await;
        let q = SearchQuery::new("labor", "v1", "Annual leave is thirty calendar days.");
        let results = retriever.search(&q).await.unwrap();
        assert_eq!(results[0].article.as_deref(), Some("29"));
        assert!(results[0].similarity > 0.99);
        for pair in results.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.similarity)));
    }

    #[tokio::test]
    async fn test_search_respects_k_and_slice() {
        let retriever = seeded().await;
        let mut q = SearchQuery::new("labor", "v1", "wages leave exits");
        q.k = 2;
        assert_eq!(retriever.search(&q).await.unwrap().len(), 2);
        let other = SearchQuery::new("labor", "v2", "wages");
        assert!(retriever.search(&other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hybrid_floor_applies_to_blended_score() {
        let retriever = seeded().await;
        let mut q = SearchQuery::new("labor", "v1", "Annual leave is thirty calendar days.");
        q.min_similarity = 0.9;

        // 0.7 × ~1.0 + 0.3 × 0 falls under the floor
        let missed = retriever.search_hybrid(&q, &kw(&["overtime"]), 0.3).await.unwrap();
        assert!(missed.is_empty());

        let hit = retriever.search_hybrid(&q, &kw(&["annual"]), 0.3).await.unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].article.as_deref(), Some("29"));
        assert!(hit.iter().all(|r| r.similarity >= 0.9));
    }

    #[tokio::test]
    async fn test_lookup_article_is_exact() {
        let retriever = seeded().await;
        let hits = retriever.lookup_article("labor", "v1", "12").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].similarity, 1.0);
        assert!(retriever.lookup_article("labor", "v1", "1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let retriever = Retriever::new(Arc::new(InMemoryStore::new()), Arc::new(FailingProvider));
        let err = retriever
            .search(&SearchQuery::new("labor", "v1", "wages"))
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::Auth(_)));
    }

    #[tokio::test]
    async fn test_lookup_article_skips_embedding() {
        let retriever = Retriever::new(Arc::new(InMemoryStore::new()), Arc::new(FailingProvider));
        assert!(retriever.lookup_article("labor", "v1", "12").await.unwrap().is_empty());
    }
}

//! Vector store abstraction for the compliance knowledge base.
//!
//! The [`VectorStore`] trait defines every persistence operation the
//! ingestion pipeline and the retriever need, so the same retrieval code
//! runs against SQLite in production and [`memory::InMemoryStore`] in tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, KbStats, SearchResult, Source};

/// Parameters for a similarity scan over one `(pack_id, version)` slice.
#[derive(Debug, Clone)]
pub struct VectorQuery<'a> {
    pub pack_id: &'a str,
    pub version: &'a str,
    pub embedding: &'a [f32],
    /// Maximum number of results.
    pub limit: usize,
    /// Results with similarity strictly below this are dropped.
    pub min_similarity: f64,
}

/// Abstract storage backend for chunks, sources, and their vectors.
///
/// All operations are async (via `async-trait`). In-memory implementations
/// return immediately-ready futures.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`replace_source`](VectorStore::replace_source) | Atomically replace a source and all its chunks |
/// | [`purge`](VectorStore::purge) | Delete a whole `(pack_id, version)` slice |
/// | [`vector_search`](VectorStore::vector_search) | Nearest chunks by cosine similarity |
/// | [`find_by_article`](VectorStore::find_by_article) | Exact lookup by article identifier |
/// | [`stats`](VectorStore::stats) | Per-slice chunk and source counts |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Replace the source keyed by `(pack_id, version, reg_code)` and all of
    /// its chunks in one unit. Either every chunk lands or none do.
    ///
    /// `vectors` must be parallel to `chunks`. Returns the new chunk IDs in
    /// chunk order.
    async fn replace_source(
        &self,
        source: &Source,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<Vec<String>>;

    /// Delete every source and chunk for `(pack_id, version)`.
    ///
    /// Returns the number of chunks removed.
    async fn purge(&self, pack_id: &str, version: &str) -> Result<u64>;

    /// Return up to `limit` chunks ordered by descending similarity, with
    /// similarity clamped to `[0.0, 1.0]`. Ties keep insertion order.
    async fn vector_search(&self, query: &VectorQuery<'_>) -> Result<Vec<SearchResult>>;

    /// Return every chunk whose article equals `article`, in insertion order,
    /// with similarity `1.0`.
    async fn find_by_article(
        &self,
        pack_id: &str,
        version: &str,
        article: &str,
    ) -> Result<Vec<SearchResult>>;

    /// Aggregate counts per `(pack_id, version)`, optionally filtered.
    async fn stats(&self, pack_id: Option<&str>, version: Option<&str>) -> Result<Vec<KbStats>>;
}

//! In-memory [`VectorStore`] implementation for tests and offline use.
//!
//! Sources and chunks live in `Vec`s behind a single `std::sync::RwLock`,
//! so a replacement is observed either entirely or not at all. Vector search
//! is brute-force cosine similarity over the requested slice.

use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::similarity;
use crate::models::{Chunk, KbStats, SearchResult, Source};

use super::{VectorQuery, VectorStore};

struct StoredChunk {
    id: String,
    source_id: String,
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Default)]
struct Inner {
    sources: Vec<Source>,
    /// Kept in insertion order; ties in search resolve by position here.
    chunks: Vec<StoredChunk>,
}

impl Inner {
    fn source(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == id)
    }

    fn to_result(&self, sc: &StoredChunk, similarity: f64) -> Option<SearchResult> {
        let source = self.source(&sc.source_id)?;
        Some(SearchResult {
            id: sc.id.clone(),
            text: sc.chunk.text.clone(),
            reg_code: source.reg_code.clone(),
            article: sc.chunk.article.clone(),
            section: sc.chunk.section.clone(),
            url: source.url.clone(),
            version: source.version.clone(),
            published_at: source.published_at,
            similarity,
        })
    }

    fn in_slice(&self, sc: &StoredChunk, pack_id: &str, version: &str) -> bool {
        self.source(&sc.source_id)
            .is_some_and(|s| s.pack_id == pack_id && s.version == version)
    }
}

/// In-memory vector store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn replace_source(
        &self,
        source: &Source,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<Vec<String>> {
        if chunks.len() != vectors.len() {
            bail!(
                "chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }

        let mut inner = self.inner.write().unwrap();
        let replaced: Vec<String> = inner
            .sources
            .iter()
            .filter(|s| {
                s.pack_id == source.pack_id
                    && s.version == source.version
                    && s.reg_code == source.reg_code
            })
            .map(|s| s.id.clone())
            .collect();
        inner.sources.retain(|s| !replaced.contains(&s.id));
        inner.chunks.retain(|c| !replaced.contains(&c.source_id));

        inner.sources.push(source.clone());
        let mut ids = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            let id = uuid::Uuid::new_v4().to_string();
            inner.chunks.push(StoredChunk {
                id: id.clone(),
                source_id: source.id.clone(),
                chunk: chunk.clone(),
                vector: vector.clone(),
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn purge(&self, pack_id: &str, version: &str) -> Result<u64> {
        let mut inner = self.inner.write().unwrap();
        let doomed: Vec<String> = inner
            .sources
            .iter()
            .filter(|s| s.pack_id == pack_id && s.version == version)
            .map(|s| s.id.clone())
            .collect();
        let before = inner.chunks.len();
        inner.chunks.retain(|c| !doomed.contains(&c.source_id));
        inner.sources.retain(|s| !doomed.contains(&s.id));
        Ok((before - inner.chunks.len()) as u64)
    }

    async fn vector_search(&self, query: &VectorQuery<'_>) -> Result<Vec<SearchResult>> {
        let inner = self.inner.read().unwrap();
        let mut results: Vec<SearchResult> = inner
            .chunks
            .iter()
            .filter(|sc| inner.in_slice(sc, query.pack_id, query.version))
            .filter_map(|sc| {
                let sim = similarity(query.embedding, &sc.vector);
                if sim < query.min_similarity {
                    return None;
                }
                inner.to_result(sc, sim)
            })
            .collect();
        // sort_by is stable, so equal scores keep insertion order
        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(query.limit);
        Ok(results)
    }

    async fn find_by_article(
        &self,
        pack_id: &str,
        version: &str,
        article: &str,
    ) -> Result<Vec<SearchResult>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .chunks
            .iter()
            .filter(|sc| sc.chunk.article.as_deref() == Some(article))
            .filter(|sc| inner.in_slice(sc, pack_id, version))
            .filter_map(|sc| inner.to_result(sc, 1.0))
            .collect())
    }

    async fn stats(&self, pack_id: Option<&str>, version: Option<&str>) -> Result<Vec<KbStats>> {
        let inner = self.inner.read().unwrap();
        let mut out: Vec<KbStats> = Vec::new();
        for source in &inner.sources {
            if pack_id.is_some_and(|p| p != source.pack_id)
                || version.is_some_and(|v| v != source.version)
            {
                continue;
            }
            let tokens: Vec<usize> = inner
                .chunks
                .iter()
                .filter(|c| c.source_id == source.id)
                .map(|c| c.chunk.token_count)
                .collect();

            let idx = match out
                .iter()
                .position(|s| s.pack_id == source.pack_id && s.version == source.version)
            {
                Some(idx) => idx,
                None => {
                    out.push(KbStats {
                        pack_id: source.pack_id.clone(),
                        version: source.version.clone(),
                        chunk_count: 0,
                        source_count: 0,
                        avg_token_count: 0.0,
                    });
                    out.len() - 1
                }
            };
            let entry = &mut out[idx];
            // accumulate the token sum in avg_token_count, divided below
            entry.avg_token_count += tokens.iter().sum::<usize>() as f64;
            entry.chunk_count += tokens.len() as i64;
            entry.source_count += 1;
        }
        for entry in &mut out {
            if entry.chunk_count > 0 {
                entry.avg_token_count /= entry.chunk_count as f64;
            }
        }
        out.sort_by(|a, b| (&a.pack_id, &a.version).cmp(&(&b.pack_id, &b.version)));
        Ok(out)
    }
}

//! SQLite-backed [`VectorStore`] implementation.
//!
//! Sources live in `kb_sources`, chunks and their embeddings in `kb_chunks`
//! (see [`crate::migrate`]). Vector search is an exact cosine scan over the
//! requested `(pack_id, version)` slice; embeddings are stored as
//! little-endian f32 BLOBs.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use compliance_kb_core::embedding::{blob_to_vec, similarity, vec_to_blob};
use compliance_kb_core::models::{Chunk, KbStats, SearchResult, Source};
use compliance_kb_core::store::{VectorQuery, VectorStore};

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const RESULT_COLUMNS: &str = r#"
    c.id, c.text, c.article, c.section, c.embedding,
    s.reg_code, s.url, s.version, s.published_at
"#;

fn parse_date(raw: Option<String>) -> Option<NaiveDate> {
    raw.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn row_to_result(row: &SqliteRow, similarity: f64) -> SearchResult {
    SearchResult {
        id: row.get("id"),
        text: row.get("text"),
        reg_code: row.get("reg_code"),
        article: row.get("article"),
        section: row.get("section"),
        url: row.get("url"),
        version: row.get("version"),
        published_at: parse_date(row.get("published_at")),
        similarity,
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
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

        let mut tx = self.pool.begin().await?;

        // kb_chunks rows go with it via ON DELETE CASCADE
        sqlx::query("DELETE FROM kb_sources WHERE pack_id = ? AND version = ? AND reg_code = ?")
            .bind(&source.pack_id)
            .bind(&source.version)
            .bind(&source.reg_code)
            .execute(&mut *tx)
            .await
            .context("delete previous source")?;

        sqlx::query(
            r#"
            INSERT INTO kb_sources (id, pack_id, version, reg_code, title, url, published_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&source.id)
        .bind(&source.pack_id)
        .bind(&source.version)
        .bind(&source.reg_code)
        .bind(&source.title)
        .bind(&source.url)
        .bind(source.published_at.map(|d| d.format("%Y-%m-%d").to_string()))
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .context("insert source")?;

        let mut ids = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            let id = uuid::Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO kb_chunks (id, source_id, pack_id, version, section, article,
                                       text, embedding, token_count)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&source.id)
            .bind(&source.pack_id)
            .bind(&source.version)
            .bind(&chunk.section)
            .bind(&chunk.article)
            .bind(&chunk.text)
            .bind(vec_to_blob(vector))
            .bind(chunk.token_count as i64)
            .execute(&mut *tx)
            .await
            .context("insert chunk")?;
            ids.push(id);
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn purge(&self, pack_id: &str, version: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let removed: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM kb_chunks WHERE pack_id = ? AND version = ?")
                .bind(pack_id)
                .bind(version)
                .fetch_one(&mut *tx)
                .await?;
        sqlx::query("DELETE FROM kb_sources WHERE pack_id = ? AND version = ?")
            .bind(pack_id)
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(removed as u64)
    }

    async fn vector_search(&self, query: &VectorQuery<'_>) -> Result<Vec<SearchResult>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RESULT_COLUMNS}
            FROM kb_chunks c
            JOIN kb_sources s ON s.id = c.source_id
            WHERE c.pack_id = ? AND c.version = ?
            ORDER BY c.seq ASC
            "#
        ))
        .bind(query.pack_id)
        .bind(query.version)
        .fetch_all(&self.pool)
        .await?;

        let mut results: Vec<SearchResult> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let sim = similarity(query.embedding, &blob_to_vec(&blob));
                (sim >= query.min_similarity).then(|| row_to_result(row, sim))
            })
            .collect();

        // Stable: equal scores keep seq order
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
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RESULT_COLUMNS}
            FROM kb_chunks c
            JOIN kb_sources s ON s.id = c.source_id
            WHERE c.pack_id = ? AND c.version = ? AND c.article = ?
            ORDER BY c.seq ASC
            "#
        ))
        .bind(pack_id)
        .bind(version)
        .bind(article)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row_to_result(row, 1.0)).collect())
    }

    async fn stats(&self, pack_id: Option<&str>, version: Option<&str>) -> Result<Vec<KbStats>> {
        let rows = sqlx::query(
            r#"
            SELECT s.pack_id, s.version,
                   COUNT(DISTINCT s.id) AS source_count,
                   COUNT(c.id) AS chunk_count,
                   COALESCE(AVG(c.token_count), 0.0) AS avg_token_count
            FROM kb_sources s
            LEFT JOIN kb_chunks c ON c.source_id = s.id
            WHERE (?1 IS NULL OR s.pack_id = ?1)
              AND (?2 IS NULL OR s.version = ?2)
            GROUP BY s.pack_id, s.version
            ORDER BY s.pack_id, s.version
            "#,
        )
        .bind(pack_id)
        .bind(version)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| KbStats {
                pack_id: row.get("pack_id"),
                version: row.get("version"),
                chunk_count: row.get("chunk_count"),
                source_count: row.get("source_count"),
                avg_token_count: row.get("avg_token_count"),
            })
            .collect())
    }
}

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the knowledge-base schema on an open pool. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // One row per ingested regulation document
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kb_sources (
            id TEXT PRIMARY KEY,
            pack_id TEXT NOT NULL,
            version TEXT NOT NULL,
            reg_code TEXT NOT NULL,
            title TEXT NOT NULL,
            url TEXT NOT NULL,
            published_at TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(pack_id, version, reg_code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // seq gives a stable insertion order for ties and article lookups
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kb_chunks (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            source_id TEXT NOT NULL,
            pack_id TEXT NOT NULL,
            version TEXT NOT NULL,
            section TEXT,
            article TEXT,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            token_count INTEGER NOT NULL,
            FOREIGN KEY (source_id) REFERENCES kb_sources(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_kb_chunks_pack_version ON kb_chunks(pack_id, version)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_kb_chunks_article ON kb_chunks(pack_id, version, article)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_kb_chunks_source ON kb_chunks(source_id)")
        .execute(pool)
        .await?;

    Ok(())
}

//! Knowledge-base statistics.
//!
//! Prints a per-`(pack, version)` breakdown of sources, chunks, and average
//! chunk size, plus the database file size.

use anyhow::{Context, Result};

use compliance_kb_core::models::KbStats;
use compliance_kb_core::store::VectorStore;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

pub async fn run_stats(config: &Config, pack_id: Option<&str>, version: Option<&str>) -> Result<()> {
    let db_path = config
        .db
        .as_ref()
        .map(|d| d.path.clone())
        .context("Knowledge base is not configured: add a [db] section to the config")?;

    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let store = SqliteStore::new(pool);
    let stats = store.stats(pack_id, version).await?;

    let db_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    println!("Compliance KB — Stats");
    println!("=====================");
    println!();
    println!("  Database:    {}", db_path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Embedding:   {}", config.embedding.provider);
    println!();

    if stats.is_empty() {
        println!("  No sources ingested.");
        store.pool().close().await;
        return Ok(());
    }

    print_table(&stats);
    println!();

    store.pool().close().await;
    Ok(())
}

fn print_table(stats: &[KbStats]) {
    println!(
        "  {:<16} {:<12} {:>8} {:>8} {:>12}",
        "PACK", "VERSION", "SOURCES", "CHUNKS", "AVG TOKENS"
    );
    println!("  {}", "-".repeat(60));
    for s in stats {
        println!(
            "  {:<16} {:<12} {:>8} {:>8} {:>12.1}",
            s.pack_id, s.version, s.source_count, s.chunk_count, s.avg_token_count
        );
    }
    let sources: i64 = stats.iter().map(|s| s.source_count).sum();
    let chunks: i64 = stats.iter().map(|s| s.chunk_count).sum();
    println!("  {}", "-".repeat(60));
    println!("  {:<29} {:>8} {:>8}", "TOTAL", sources, chunks);
}

/// Format a byte count as a human-readable string (e.g. "1.5 MB").
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}

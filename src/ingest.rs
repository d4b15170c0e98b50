//! Ingestion pipeline orchestration.
//!
//! Reads a source manifest, then for each source: read file → chunk →
//! embed every chunk (throttled) → replace the source in the store. All
//! chunks are embedded before anything is written, so a source lands
//! completely or not at all. A failing source is reported and the run
//! moves on to the next one.
//!
//! # Manifest format
//!
//! ```toml
//! [[sources]]
//! title = "Labor Law"
//! url = "https://example.gov/labor-law"
//! reg_code = "LL-2005"
//! published_at = "2005-09-27"
//! pack_id = "labor"
//! version = "2024.1"
//! path = "labor-law.md"   # relative to the manifest
//! ```

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use compliance_kb_core::chunk::{chunk_document, ChunkOptions};
use compliance_kb_core::embedding::{truncate_chars, EmbeddingProvider};
use compliance_kb_core::models::Source;
use compliance_kb_core::store::VectorStore;

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Deserialize, Clone)]
pub struct Manifest {
    #[serde(default)]
    pub sources: Vec<ManifestSource>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ManifestSource {
    pub title: String,
    pub url: String,
    pub reg_code: String,
    #[serde(default)]
    pub published_at: Option<NaiveDate>,
    pub pack_id: String,
    pub version: String,
    pub path: PathBuf,
}

impl ManifestSource {
    fn to_source(&self) -> Source {
        Source {
            id: uuid::Uuid::new_v4().to_string(),
            title: self.title.clone(),
            url: self.url.clone(),
            reg_code: self.reg_code.clone(),
            published_at: self.published_at,
            pack_id: self.pack_id.clone(),
            version: self.version.clone(),
        }
    }
}

/// Parse a manifest and resolve every source path against its directory.
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    let mut manifest: Manifest =
        toml::from_str(&content).with_context(|| "Failed to parse manifest")?;

    if manifest.sources.is_empty() {
        bail!("Manifest {} lists no sources", path.display());
    }

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for source in &mut manifest.sources {
        for (field, value) in [
            ("reg_code", &source.reg_code),
            ("pack_id", &source.pack_id),
            ("version", &source.version),
        ] {
            if value.trim().is_empty() {
                bail!("Manifest source '{}': {field} must not be empty", source.title);
            }
        }
        if source.path.is_relative() {
            source.path = base.join(&source.path);
        }
    }
    Ok(manifest)
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chunking: ChunkOptions,
    /// Delay between consecutive embedding calls.
    pub throttle: Duration,
    /// Delete each touched `(pack_id, version)` before ingesting.
    pub purge: bool,
}

impl IngestOptions {
    pub fn from_config(config: &Config, purge: bool) -> Self {
        Self {
            chunking: ChunkOptions {
                target_tokens: config.chunking.target_tokens,
                overlap_tokens: config.chunking.overlap_tokens,
            },
            throttle: Duration::from_millis(config.embedding.throttle_ms),
            purge,
        }
    }
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub sources_ingested: usize,
    pub chunks_written: usize,
    pub chunks_purged: u64,
    /// `(reg_code, error)` for each source that was skipped.
    pub failures: Vec<(String, String)>,
}

/// Ingest one source. Nothing is written unless every chunk embeds.
pub async fn ingest_source(
    store: &dyn VectorStore,
    provider: &dyn EmbeddingProvider,
    entry: &ManifestSource,
    opts: &IngestOptions,
) -> Result<usize> {
    let text = std::fs::read_to_string(&entry.path)
        .with_context(|| format!("Failed to read source file: {}", entry.path.display()))?;
    let chunks = chunk_document(&text, &opts.chunking);

    let mut vectors = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 && !opts.throttle.is_zero() {
            tokio::time::sleep(opts.throttle).await;
        }
        let input = truncate_chars(&chunk.text, provider.max_input_chars());
        let vector = provider
            .embed(input)
            .await
            .with_context(|| format!("embed chunk {} of {}", i + 1, chunks.len()))?;
        vectors.push(vector);
    }

    store
        .replace_source(&entry.to_source(), &chunks, &vectors)
        .await
        .context("write source")?;
    Ok(chunks.len())
}

/// Ingest every source in the manifest, continuing past failures.
pub async fn ingest_manifest(
    store: &dyn VectorStore,
    provider: &dyn EmbeddingProvider,
    manifest: &Manifest,
    opts: &IngestOptions,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();

    if opts.purge {
        let mut slices: Vec<(&str, &str)> = manifest
            .sources
            .iter()
            .map(|s| (s.pack_id.as_str(), s.version.as_str()))
            .collect();
        slices.sort_unstable();
        slices.dedup();
        for (pack_id, version) in slices {
            let removed = store.purge(pack_id, version).await?;
            tracing::info!(pack = pack_id, version, removed, "purged knowledge base slice");
            report.chunks_purged += removed;
        }
    }

    for entry in &manifest.sources {
        match ingest_source(store, provider, entry, opts).await {
            Ok(n) => {
                tracing::info!(
                    reg_code = %entry.reg_code,
                    pack = %entry.pack_id,
                    version = %entry.version,
                    chunks = n,
                    "ingested source"
                );
                report.sources_ingested += 1;
                report.chunks_written += n;
            }
            Err(e) => {
                tracing::warn!(reg_code = %entry.reg_code, error = %format!("{e:#}"), "source failed");
                report.failures.push((entry.reg_code.clone(), format!("{e:#}")));
            }
        }
    }

    Ok(report)
}

/// `ckb ingest` entry point.
pub async fn run_ingest(config: &Config, manifest_path: &Path, purge: bool, dry_run: bool) -> Result<()> {
    let manifest = load_manifest(manifest_path)?;
    let opts = IngestOptions::from_config(config, purge);

    if dry_run {
        println!("ingest {} (dry-run)", manifest_path.display());
        let mut total_chunks = 0;
        for entry in &manifest.sources {
            let text = std::fs::read_to_string(&entry.path)
                .with_context(|| format!("Failed to read source file: {}", entry.path.display()))?;
            let n = chunk_document(&text, &opts.chunking).len();
            println!("  {} [{}@{}]: {} chunks", entry.reg_code, entry.pack_id, entry.version, n);
            total_chunks += n;
        }
        println!("  sources: {}", manifest.sources.len());
        println!("  estimated chunks: {}", total_chunks);
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Cannot ingest: embedding provider is disabled. Set [embedding] provider in the config.");
    }
    let provider = create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let store = SqliteStore::new(pool);

    let report = ingest_manifest(&store, provider.as_ref(), &manifest, &opts).await?;

    println!("ingest {}", manifest_path.display());
    if purge {
        println!("  chunks purged: {}", report.chunks_purged);
    }
    println!("  sources ingested: {}", report.sources_ingested);
    println!("  chunks written: {}", report.chunks_written);
    for (reg_code, err) in &report.failures {
        eprintln!("  FAILED {}: {}", reg_code, err);
    }

    if !report.failures.is_empty() {
        bail!("{} of {} sources failed", report.failures.len(), manifest.sources.len());
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use compliance_kb_core::embedding::FeatureHashProvider;
    use compliance_kb_core::store::memory::InMemoryStore;
    use compliance_kb_core::KbError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Succeeds `ok_calls` times, then fails.
    struct FlakyProvider {
        ok_calls: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        fn model_name(&self) -> &str {
            "flaky"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, KbError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.ok_calls {
                Ok(vec![1.0, 0.0, 0.0, 0.0])
            } else {
                Err(KbError::RateLimited { attempts: 3 })
            }
        }
    }

    fn opts() -> IngestOptions {
        IngestOptions {
            chunking: ChunkOptions {
                target_tokens: 20,
                overlap_tokens: 5,
            },
            throttle: Duration::ZERO,
            purge: false,
        }
    }

    fn write_manifest(dir: &Path, sources: &[(&str, &str, &str)]) -> PathBuf {
        let mut manifest = String::new();
        for (reg_code, version, body) in sources {
            let file = format!("{reg_code}-{version}.md");
            std::fs::write(dir.join(&file), body).unwrap();
            manifest.push_str(&format!(
                "[[sources]]\ntitle = \"{reg_code}\"\nurl = \"https://example.gov/{reg_code}\"\n\
                 reg_code = \"{reg_code}\"\npublished_at = \"2005-09-27\"\npack_id = \"labor\"\n\
                 version = \"{version}\"\npath = \"{file}\"\n\n"
            ));
        }
        let path = dir.join("manifest.toml");
        std::fs::write(&path, manifest).unwrap();
        path
    }

    const LAW: &str = "## Article 1\nWages are paid monthly.\n\n## Article 2\nLeave is thirty days.\n";

    #[test]
    fn test_load_manifest_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), &[("LL", "v1", LAW)]);
        let manifest = load_manifest(&path).unwrap();
        assert_eq!(manifest.sources.len(), 1);
        assert_eq!(manifest.sources[0].path, dir.path().join("LL-v1.md"));
        assert_eq!(manifest.sources[0].published_at, NaiveDate::from_ymd_opt(2005, 9, 27));
    }

    #[test]
    fn test_empty_manifest_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.toml");
        std::fs::write(&path, "").unwrap();
        assert!(load_manifest(&path).is_err());
    }

    #[tokio::test]
    async fn test_ingest_manifest_writes_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), &[("LL", "v1", LAW)]);
        let manifest = load_manifest(&path).unwrap();
        let store = InMemoryStore::new();
        let provider = FeatureHashProvider::new(64);

        let report = ingest_manifest(&store, &provider, &manifest, &opts()).await.unwrap();
        assert_eq!(report.sources_ingested, 1);
        assert_eq!(report.chunks_written, 2);
        assert!(report.failures.is_empty());

        let hits = store.find_by_article("labor", "v1", "2").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.contains("thirty days"));
    }

    #[tokio::test]
    async fn test_failed_source_writes_nothing_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), &[("LL", "v1", LAW), ("OSH", "v1", "Short text.")]);
        let manifest = load_manifest(&path).unwrap();
        let store = InMemoryStore::new();
        // First source needs two embeddings; only one succeeds
        let provider = FlakyProvider {
            ok_calls: 1,
            calls: AtomicUsize::new(0),
        };

        let report = ingest_manifest(&store, &provider, &manifest, &opts()).await.unwrap();
        assert_eq!(report.sources_ingested, 0);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].0, "LL");
        assert!(store.stats(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_clears_touched_slices() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryStore::new();
        let provider = FeatureHashProvider::new(64);

        let first = load_manifest(&write_manifest(dir.path(), &[("OLD", "v1", LAW)])).unwrap();
        ingest_manifest(&store, &provider, &first, &opts()).await.unwrap();

        let second = load_manifest(&write_manifest(dir.path(), &[("LL", "v1", LAW)])).unwrap();
        let mut purge = opts();
        purge.purge = true;
        let report = ingest_manifest(&store, &provider, &second, &purge).await.unwrap();
        assert_eq!(report.chunks_purged, 2);

        let stats = store.stats(Some("labor"), Some("v1")).await.unwrap();
        assert_eq!(stats[0].source_count, 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.toml");
        std::fs::write(
            &path,
            "[[sources]]\ntitle = \"X\"\nurl = \"u\"\nreg_code = \"X\"\npack_id = \"labor\"\nversion = \"v1\"\npath = \"missing.md\"\n",
        )
        .unwrap();
        let manifest = load_manifest(&path).unwrap();
        let report = ingest_manifest(&InMemoryStore::new(), &FeatureHashProvider::new(8), &manifest, &opts())
            .await
            .unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].1.contains("missing.md"));
    }
}

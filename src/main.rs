//! # Compliance KB CLI (`ckb`)
//!
//! The `ckb` binary manages the regulation knowledge base and runs
//! compliance packs against documents.
//!
//! ## Usage
//!
//! ```bash
//! ckb --config ./config/ckb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ckb init` | Create the SQLite database and run schema migrations |
//! | `ckb ingest <manifest>` | Chunk, embed, and store the sources in a manifest |
//! | `ckb search "<query>"` | Search one `(pack, version)` slice of the KB |
//! | `ckb stats` | Per-pack source and chunk counts |
//! | `ckb analyze --pack <id> <file>` | Run a compliance pack against a document |
//! | `ckb serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! ckb init
//!
//! # Replace everything for the manifest's pack versions
//! ckb ingest ./demos/manifest.toml --purge
//!
//! # Hybrid search
//! ckb search "wage payment deadline" --pack labor --version 2024.1 --keywords wage,salary
//!
//! # Exact article lookup
//! ckb search "" --pack labor --version 2024.1 --article 12
//!
//! # Score an invoice
//! ckb analyze --pack zatca ./invoice.txt --json
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use compliance_kb::search::{parse_keywords, KbSearchRequest};
use compliance_kb::{config, ingest, migrate, pack, search, server, stats};

/// Compliance KB CLI for regulation retrieval and weighted
/// compliance scoring.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ckb.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ckb",
    about = "Compliance KB — regulation retrieval, citations, and compliance scoring",
    version,
    long_about = "Compliance KB chunks regulation documents by heading, embeds them into a \
    versioned vector store, and backs compliance packs with cited, weighted checklists via a \
    CLI and HTTP server."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/ckb.toml`.
    #[arg(long, global = true, default_value = "./config/ckb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the kb_sources and kb_chunks
    /// tables. Safe to run repeatedly.
    Init,

    /// Ingest the sources listed in a manifest.
    ///
    /// Each source is chunked, embedded, and written as one unit; a failing
    /// source is skipped and reported, and the command exits non-zero.
    Ingest {
        /// Path to the source manifest (TOML).
        manifest: PathBuf,

        /// Delete every (pack, version) the manifest touches before ingesting.
        #[arg(long)]
        purge: bool,

        /// Show source and chunk counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search the knowledge base.
    Search {
        /// The search query string.
        query: String,

        /// Pack identifier (e.g. `zatca`).
        #[arg(long)]
        pack: String,

        /// Regulation version (e.g. `2024.1`).
        #[arg(long)]
        version: String,

        /// Maximum number of results.
        #[arg(long)]
        k: Option<usize>,

        /// Drop results below this similarity (0.0–1.0).
        #[arg(long)]
        min_similarity: Option<f64>,

        /// Comma-separated keywords; enables the hybrid keyword boost.
        #[arg(long)]
        keywords: Option<String>,

        /// Exact article lookup instead of semantic search.
        #[arg(long)]
        article: Option<String>,
    },

    /// Show knowledge-base statistics.
    Stats {
        /// Only this pack.
        #[arg(long)]
        pack: Option<String>,

        /// Only this version.
        #[arg(long)]
        version: Option<String>,
    },

    /// Run a compliance pack against a text document.
    Analyze {
        /// Pack identifier from `[packs.<id>]`.
        #[arg(long)]
        pack: String,

        /// Document to analyze.
        file: PathBuf,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP server.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            manifest,
            purge,
            dry_run,
        } => {
            ingest::run_ingest(&cfg, &manifest, purge, dry_run).await?;
        }
        Commands::Search {
            query,
            pack,
            version,
            k,
            min_similarity,
            keywords,
            article,
        } => {
            let req = KbSearchRequest {
                pack_id: pack,
                version,
                query,
                article,
                k,
                min_similarity,
                keywords: keywords.as_deref().map(parse_keywords).unwrap_or_default(),
            };
            search::run_search(&cfg, req).await?;
        }
        Commands::Stats { pack, version } => {
            stats::run_stats(&cfg, pack.as_deref(), version.as_deref()).await?;
        }
        Commands::Analyze { pack, file, json } => {
            pack::run_analyze(&cfg, &pack, &file, json).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

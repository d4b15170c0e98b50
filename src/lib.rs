//! # Compliance KB
//!
//! A regulation knowledge base that backs compliance packs with citations.
//!
//! Regulation documents are split by heading into chunks, embedded, and
//! stored per `(pack_id, version)` in SQLite. Compliance packs evaluate a
//! document into checklist items; each item is annotated with the closest
//! regulation chunks and the checklist is reduced to a weighted score.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │   Manifest   │──▶│ Chunk+Embed  │──▶│  SQLite   │
//! │ (regulations)│   │  (throttled) │   │ kb_chunks │
//! └──────────────┘   └──────────────┘   └────┬─────┘
//!                                            │ Retriever
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                 ┌──────────┐  cites   ┌──────────┐
//!                 │   CLI    │◀────────│  Packs   │
//!                 │  (ckb)   │  HTTP   │ + score  │
//!                 └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ckb init                                   # create database
//! ckb ingest demos/manifest.toml             # chunk + embed regulations
//! ckb search "invoice QR code" --pack zatca --version 2024.1
//! ckb analyze --pack zatca invoice.txt       # cited, scored checklist
//! ckb serve                                  # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`embedding`] | OpenAI, Ollama, and disabled embedding providers |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`ingest`] | Manifest-driven ingestion pipeline |
//! | [`search`] | KB search with timeouts |
//! | [`citations`] | Concurrent citation attachment |
//! | [`pack`] | Compliance packs and pack runs |
//! | [`stats`] | KB statistics |
//! | [`server`] | HTTP server |
//!
//! Chunking, retrieval, citation, and scoring logic lives in the
//! `compliance-kb-core` crate.

pub mod citations;
pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod migrate;
pub mod pack;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;

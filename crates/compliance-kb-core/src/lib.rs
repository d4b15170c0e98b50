//! # Compliance KB Core
//!
//! Shared, I/O-free logic for the compliance knowledge base: data models,
//! heading-aware chunking, the embedding and vector-store traits, the
//! retriever, citation attachment, and the weighted compliance scorer.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! Concrete stores and embedding backends live in the `compliance-kb`
//! application crate; [`store::memory::InMemoryStore`] and
//! [`embedding::FeatureHashProvider`] are provided here for tests and
//! offline use.

pub mod chunk;
pub mod citation;
pub mod embedding;
pub mod error;
pub mod models;
pub mod score;
pub mod search;
pub mod store;

pub use error::KbError;

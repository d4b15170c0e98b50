//! Core data models shared by the chunker, retriever, citation attacher,
//! scorer, and pack engine.
//!
//! These types are the same for every store backend and every frontend.
//! JSON field names are camelCase to match the HTTP boundary contract.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A contiguous span of regulation text produced by the chunker.
///
/// `token_count` is always `ceil(char_count / 4)` of `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub text: String,
    /// Heading the chunk was taken from (`"Introduction"` for preamble text).
    pub section: Option<String>,
    /// Clause identifier extracted from the heading, e.g. `"12.b"`.
    pub article: Option<String>,
    pub token_count: usize,
}

/// Metadata envelope for one regulation document.
///
/// A source is identified for replacement purposes by
/// `(pack_id, version, reg_code)`; it owns all chunks ingested from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub title: String,
    pub url: String,
    pub reg_code: String,
    pub published_at: Option<NaiveDate>,
    pub pack_id: String,
    pub version: String,
}

/// A retrieved chunk with its similarity to the query.
///
/// Produced fresh per query and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Chunk UUID.
    pub id: String,
    pub text: String,
    pub reg_code: String,
    pub article: Option<String>,
    pub section: Option<String>,
    pub url: String,
    pub version: String,
    pub published_at: Option<NaiveDate>,
    /// Similarity in `[0.0, 1.0]`, where `1.0` means identical.
    pub similarity: f64,
}

/// A citation from a checklist item to a knowledge-base chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CitationRef {
    pub chunk_id: String,
    pub reg_code: String,
    pub article: Option<String>,
    pub version: String,
    pub url: String,
    pub published_at: Option<NaiveDate>,
    /// Similarity carried over from retrieval; never below the attacher's floor.
    pub confidence: f64,
}

impl From<SearchResult> for CitationRef {
    fn from(r: SearchResult) -> Self {
        Self {
            chunk_id: r.id,
            reg_code: r.reg_code,
            article: r.article,
            version: r.version,
            url: r.url,
            published_at: r.published_at,
            confidence: r.similarity,
        }
    }
}

/// Outcome of a single checklist rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
    /// The rule could not be resolved. Scored like [`CheckStatus::Fail`].
    Unknown,
}

/// Integer weight in `1..=5` expressing how much an item matters to the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Criticality(u8);

impl Criticality {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Criticality {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!(
                "criticality must be between {} and {}, got {}",
                Self::MIN,
                Self::MAX,
                value
            ))
        }
    }
}

impl From<Criticality> for u8 {
    fn from(c: Criticality) -> u8 {
        c.0
    }
}

/// A single compliance finding produced by a pack rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    /// Stable identifier within the pack.
    pub key: String,
    pub title: String,
    pub description: String,
    pub status: CheckStatus,
    pub criticality: Criticality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(default)]
    pub citations: Vec<CitationRef>,
}

impl ChecklistItem {
    pub fn new(
        key: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        status: CheckStatus,
        criticality: Criticality,
    ) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            description: description.into(),
            status,
            criticality,
            recommendation: None,
            citations: Vec::new(),
        }
    }
}

/// Terminal state of a pack run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackStatus {
    Completed,
    Partial,
    Failed,
}

/// The result of running one pack against one analysis input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackResult {
    pub pack_id: String,
    pub version: String,
    pub status: PackStatus,
    /// Weighted compliance score in `[0, 100]`.
    pub score: u8,
    pub items: Vec<ChecklistItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Aggregate statistics for one `(pack_id, version)` slice of the KB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KbStats {
    pub pack_id: String,
    pub version: String,
    pub chunk_count: i64,
    pub source_count: i64,
    pub avg_token_count: f64,
}

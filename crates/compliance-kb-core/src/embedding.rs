//! Text embeddings for the knowledge base.
//!
//! The [`EmbeddingProvider`] trait is the seam every backend plugs into.
//! This module also holds a deterministic offline backend ([`FeatureHashProvider`]),
//! and pure helpers for truncation, vector serialization, and similarity.
//!
//! Network-backed providers (OpenAI, Ollama) live in the `compliance-kb`
//! app crate.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::KbError;

/// Default provider input limit, in characters.
///
/// The reference provider accepts 8191 tokens; passing at most that many
/// characters keeps every input under the limit regardless of tokenizer.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 8191;

/// Turns text into a dense vector of fixed length.
///
/// Implementations convert text into a fixed-length dense vector. Callers
/// should truncate with [`truncate_chars`] to [`max_input_chars`](Self::max_input_chars)
/// before calling [`embed`](Self::embed); implementations truncate again.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded in logs, e.g. `text-embedding-3-small`.
    fn model_name(&self) -> &str;
    /// Length of every vector this provider returns.
    fn dims(&self) -> usize;
    /// Maximum number of characters passed to the backend.
    fn max_input_chars(&self) -> usize {
        DEFAULT_MAX_INPUT_CHARS
    }
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, KbError>;
}

/// Truncate `text` to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Deterministic, offline embedder based on feature hashing.
///
/// Each lowercase alphanumeric word is hashed (SHA-256) into one of `dims`
/// buckets with a ±1 sign, and the vector is L2-normalized. Identical text
/// always yields an identical vector, and texts sharing vocabulary score
/// higher than unrelated ones. Used for tests and for running the KB without
/// an external provider; it is not a semantic model.
#[derive(Debug, Clone)]
pub struct FeatureHashProvider {
    dims: usize,
}

impl FeatureHashProvider {
    pub const MODEL_NAME: &'static str = "feature-hash";

    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vec[idx] += sign;
        }

        let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut vec {
                *x /= norm;
            }
        }
        vec
    }
}

#[async_trait]
impl EmbeddingProvider for FeatureHashProvider {
    fn model_name(&self) -> &str {
        Self::MODEL_NAME
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, KbError> {
        Ok(self.embed_sync(truncate_chars(text, self.max_input_chars())))
    }
}

/// Serialize a vector for the `kb_chunks.embedding` column.
///
/// Layout is `dims × 4` bytes, each component little-endian.
///
/// ```rust
/// use compliance_kb_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let stored = vec_to_blob(&[0.25, -1.0]);
/// assert_eq!(stored.len(), 8);
/// assert_eq!(blob_to_vec(&stored), vec![0.25, -1.0]);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]. Trailing bytes that do not form a full
/// component are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine of the angle between `a` and `b`, in `[-1.0, 1.0]`.
///
/// Mismatched lengths, empty input, and zero vectors yield `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (x, y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });
    let norms = (aa * bb).sqrt();
    if norms < f32::EPSILON {
        0.0
    } else {
        dot / norms
    }
}

/// Similarity as `1 - cosine_distance`, clamped to `[0.0, 1.0]`.
///
/// Cosine distance is `1 - cosine_similarity`, so this is the cosine
/// similarity with anti-correlated vectors floored at zero.
pub fn similarity(a: &[f32], b: &[f32]) -> f64 {
    let distance = 1.0 - cosine_similarity(a, b) as f64;
    (1.0 - distance).clamp(0.0, 1.0)
}

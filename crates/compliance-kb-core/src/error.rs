//! Error type for retrieval and embedding.

use std::time::Duration;

/// Failures surfaced by the retrieval path.
///
/// Store implementations report through `anyhow` and are folded into
/// [`KbError::Store`] by the retriever; embedding providers return this
/// type directly so retry logic can classify failures.
#[derive(Debug, thiserror::Error)]
pub enum KbError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("embedding provider is disabled")]
    Disabled,

    #[error("embedding provider rejected credentials: {0}")]
    Auth(String),

    #[error("embedding provider rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("embedding provider error: {0}")]
    Provider(String),

    /// A 4xx other than auth or rate limiting; resending the same request
    /// gets the same answer.
    #[error("embedding provider rejected the request: {0}")]
    Rejected(String),

    #[error("vector store error: {0}")]
    Store(String),

    #[error("retrieval timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl KbError {
    /// Whether a retry at the embedding-call boundary may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, KbError::RateLimited { .. } | KbError::Provider(_))
    }

    pub(crate) fn store(err: anyhow::Error) -> Self {
        KbError::Store(format!("{err:#}"))
    }
}

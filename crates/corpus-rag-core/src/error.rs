//! Retrieval error taxonomy.
//!
//! Tier-level failures are normally caught by the engine and recorded in
//! response metadata. These variants reach the caller only when a request
//! is rejected up front or when no ranking tier could complete.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Empty query, unknown persona, or out-of-range option.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Entity, edge, or chunk store unreachable.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Embedding service error or timeout.
    #[error("embedding failure: {0}")]
    EmbeddingFailure(String),

    /// Neither the lexical nor the vector tier completed.
    #[error("retrieval failed: {}", reasons.join("; "))]
    RetrievalFailed { reasons: Vec<String> },
}

impl RetrievalError {
    /// Wrap a store-level error, keeping the full cause chain in the message.
    pub fn store(err: anyhow::Error) -> Self {
        RetrievalError::StoreUnavailable(format!("{:#}", err))
    }

    /// Whether the chat layer should render this as "temporarily unavailable"
    /// rather than as a bad request.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            RetrievalError::StoreUnavailable(_)
                | RetrievalError::EmbeddingFailure(_)
                | RetrievalError::RetrievalFailed { .. }
        )
    }
}

pub type RetrievalResult<T> = std::result::Result<T, RetrievalError>;

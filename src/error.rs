//! Error taxonomy.
//!
//! [`RetrievalError`] is the crate-level error; every fallible public
//! operation returns it. [`EmbeddingError`] is internal to the embedding
//! provider and classifies failures as transient (worth retrying) or
//! persistent; retry exhaustion and persistent failures both surface as
//! [`RetrievalError::EmbeddingUnavailable`].

use std::time::Duration;

pub type Result<T, E = RetrievalError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// A document could not be listed or fetched from the source.
    #[error("source fetch failed for {id}: {reason}")]
    SourceFetch { id: String, reason: String },

    /// The embedding provider failed after retries (or persistently).
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The committed index violates a structural invariant.
    #[error("index corruption: {0}")]
    IndexCorruption(String),

    /// A query exceeded its time budget.
    #[error("query timed out after {0:?}")]
    QueryTimeout(Duration),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Failure classification for one embedding API call.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("rate limited")]
    RateLimited,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl EmbeddingError {
    /// Transient failures are retried with backoff; persistent ones are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbeddingError::RateLimited | EmbeddingError::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(EmbeddingError::RateLimited.is_transient());
        assert!(EmbeddingError::Network("reset".into()).is_transient());
        assert!(!EmbeddingError::Auth("bad key".into()).is_transient());
        assert!(!EmbeddingError::Malformed("no data".into()).is_transient());
    }

    #[test]
    fn storage_errors_convert() {
        let err: RetrievalError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, RetrievalError::Storage(_)));
    }
}

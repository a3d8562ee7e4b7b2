use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("index not initialized: call build or load first")]
    NotInitialized,
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("duplicate fragment identifier: {0}")]
    DuplicateIdentifier(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("snapshot integrity violation: {0}")]
    Integrity(String),
    #[error("embedding service unavailable after {attempts} attempts: {}", .errors.join("; "))]
    EmbeddingUnavailable { attempts: usize, errors: Vec<String> },
    #[error("remote service error: {0}")]
    Remote(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    pub fn integrity<E: std::fmt::Display>(err: E) -> Self {
        RagError::Integrity(err.to_string())
    }

    pub fn remote<E: std::fmt::Display>(err: E) -> Self {
        RagError::Remote(err.to_string())
    }

    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::Remote(_) | RagError::Io(_))
    }
}

//! Engine Error Types

use thiserror::Error;

/// Engine Result type alias
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// Core policy or validation error
    #[error(transparent)]
    Core(#[from] engram_core::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] engram_core::ConfigValidationError),

    /// Database error (aborts the batch transaction; no partial commit)
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Entity not found
    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    /// Unknown view name
    #[error("unknown view: {0}")]
    UnknownView(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Create a not found error
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Check if this error is recoverable by retrying the batch later
    /// (oracle trouble, including timeouts) rather than a hard storage
    /// failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Core(engram_core::Error::Oracle { .. }))
    }

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

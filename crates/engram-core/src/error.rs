//! Error types for engram-core.

use thiserror::Error;

/// Result type alias using engram-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for engram operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigValidationError),

    /// A candidate operation that cannot be applied as-is
    #[error("invalid candidate: {message}")]
    InvalidCandidate { message: String },

    /// Malformed or out-of-range value in the data model
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    /// Unknown string code for a closed enum (kind, scope, decision)
    #[error("unknown {what}: {value}")]
    UnknownCode { what: &'static str, value: String },

    /// Extraction oracle failure (recoverable; the batch is retried)
    #[error("oracle error: {message}")]
    Oracle { message: String },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl Error {
    /// Create an invalid candidate error
    pub fn invalid_candidate(message: impl Into<String>) -> Self {
        Self::InvalidCandidate {
            message: message.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an oracle error
    pub fn oracle(message: impl Into<String>) -> Self {
        Self::Oracle {
            message: message.into(),
        }
    }

    /// Check if this error is a per-candidate validation error
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidCandidate { .. } | Self::InvalidValue { .. } | Self::UnknownCode { .. }
        )
    }
}

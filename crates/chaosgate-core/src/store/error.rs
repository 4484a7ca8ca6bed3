//! Error types for the experiment repository.

use thiserror::Error;

/// Errors that can occur in the repository layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend could not complete the operation
    #[error("backend failure: {0}")]
    Backend(String),

    /// Record could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A record was written with an empty identifier
    #[error("missing identifier for {kind}")]
    MissingId { kind: &'static str },
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type for repository operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

//! Domain-level error taxonomy for ChaosGate.

use crate::store::StorageError;

/// ChaosGate domain errors.
#[derive(Debug, thiserror::Error)]
pub enum ChaosError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("dispatch failed for run {run_id}: {reason}")]
    DispatchFailed { run_id: String, reason: String },

    #[error("policy denied: {reason}")]
    PolicyDenied { reason: String },

    #[error("invalid experiment definition: {0}")]
    InvalidDefinition(String),

    #[error("baseline breached before dispatch: {reason}")]
    BaselineBreached { reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for ChaosGate domain operations.
pub type Result<T> = std::result::Result<T, ChaosError>;

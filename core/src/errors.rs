//! Error types for the cohort coordination core

use thiserror::Error;

/// Main error type for the coordination core
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Stale snapshot: {0}")]
    StaleSnapshot(String),

    #[error("Capability gap: {0}")]
    CapabilityGap(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Whether the error signals a transient race which a caller may retry.
    ///
    /// A confirm rejected because the registry changed after the snapshot was
    /// issued falls in this class; retrying with a fresh snapshot can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordinatorError::StaleSnapshot(_))
    }

    /// Whether the error signals a missing client capability.
    ///
    /// Retrying cannot succeed without a client or plugin update.
    pub fn is_capability_gap(&self) -> bool {
        matches!(self, CoordinatorError::CapabilityGap(_))
    }
}

impl From<anyhow::Error> for CoordinatorError {
    fn from(err: anyhow::Error) -> Self {
        CoordinatorError::Internal(err.to_string())
    }
}

//! Error types for the feature services.

use thiserror::Error;

/// Errors that can occur in feature operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Remote store error.
    #[error("store error: {0}")]
    Store(#[from] momentum_store::StoreError),

    /// Cached read failed.
    #[error(transparent)]
    Query(#[from] momentum_store::QueryError),

    /// Input rejected before any write was attempted.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// A row the operation depends on does not exist.
    #[error("{what} not found")]
    NotFound { what: String },
}

impl TrackerError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        TrackerError::Invalid(message.into())
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        TrackerError::NotFound { what: what.into() }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;

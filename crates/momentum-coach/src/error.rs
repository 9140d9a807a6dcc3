//! Error types for the coach.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoachError {
    /// The coaching endpoint or a memory write failed.
    #[error("store error: {0}")]
    Store(#[from] momentum_store::StoreError),

    /// Cached read failed.
    #[error(transparent)]
    Query(#[from] momentum_store::QueryError),

    /// The conversation cannot be sent as is.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, CoachError>;

//! Error types for the remote store client.

use std::sync::Arc;

use thiserror::Error;

use crate::cache::QueryKey;

/// Errors that can occur when talking to the remote store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Authentication failed or the session was rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No row matched.
    #[error("not found: {table}")]
    NotFound { table: String },

    /// A uniqueness constraint rejected a plain insert.
    #[error("conflict on {table}: {message}")]
    Conflict { table: String, message: String },

    /// Structured error returned by the REST layer.
    #[error("API error{}: {message}", code.as_deref().map(|c| format!(" {}", c)).unwrap_or_default())]
    Api {
        code: Option<String>,
        message: String,
        hint: Option<String>,
    },

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// A write without any filter was refused client-side.
    #[error("refusing unfiltered {operation} on {table}")]
    UnfilteredWrite { operation: &'static str, table: String },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Realtime channel error (rejected join, closed channel).
    #[error("realtime error: {0}")]
    Realtime(String),
}

/// Errors reported by the query cache.
///
/// Clonable so that every caller waiting on a de-duplicated fetch receives the
/// same outcome.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// The fetch function failed.
    #[error("query {key} failed: {source}")]
    Failed {
        key: QueryKey,
        #[source]
        source: Arc<StoreError>,
    },

    /// The cached value has a different type than the one requested.
    #[error("query {key} holds a value of a different type")]
    TypeMismatch { key: QueryKey },

    /// The in-flight fetch was dropped before it produced a result.
    #[error("query {key} was cancelled")]
    Cancelled { key: QueryKey },
}

impl QueryError {
    /// The key this error belongs to.
    pub fn key(&self) -> &QueryKey {
        match self {
            QueryError::Failed { key, .. }
            | QueryError::TypeMismatch { key }
            | QueryError::Cancelled { key } => key,
        }
    }

    /// The underlying store error, if the fetch itself failed.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            QueryError::Failed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

//! Error types for tfstate-store

use thiserror::Error;

use crate::record::RecordKey;

/// Errors that can occur while talking to the remote object store
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Target record does not exist
    #[error("{0} not found")]
    NotFound(RecordKey),

    /// Target record already exists
    #[error("{0} already exists")]
    AlreadyExists(RecordKey),

    /// Concurrent modification rejected by the store
    #[error("conflict on {key}: {message}")]
    Conflict {
        /// Record the write was aimed at
        key: RecordKey,
        /// Message returned by the store
        message: String,
    },

    /// Request never produced a response (connect, TLS, timeout)
    #[error("transport error: {0}")]
    Transport(String),

    /// Store answered with an unexpected status
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the store
        message: String,
    },

    /// Payload could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record returned by the store is malformed
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Invalid client configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

impl StoreError {
    /// Check if the target record was absent
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Check if the target record was already present
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    /// Check if repeating the same request may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Transport(_) | StoreError::Conflict { .. } => true,
            StoreError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Check if the store refused the request itself
    ///
    /// Malformed or invalid objects (400, 422) and records that cannot be
    /// encoded are rejected the same way on every attempt.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        match self {
            StoreError::Api { status, .. } => matches!(status, 400 | 422),
            StoreError::InvalidRecord(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            StoreError::Serialization(e.to_string())
        } else {
            StoreError::Transport(e.to_string())
        }
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

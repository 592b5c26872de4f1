//! Error types for the Jot core.
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for Jot operations
pub type JotResult<T> = Result<T, JotError>;

/// Main error type for Jot operations
#[derive(Error, Debug)]
pub enum JotError {
    /// A mutation was attempted with no session and guest mode disabled.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The id does not resolve in its namespace, or the caller does not
    /// own the note. Ownership failures deliberately report as not-found
    /// so callers cannot probe for the existence of other users' notes.
    #[error("not found: {0}")]
    NotFound(String),

    /// The id string is empty or malformed for its namespace.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A read failed and no cached projection exists to fall back on.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("sync error: {0}")]
    Sync(String),

    #[error("validation error in {field}: {message}")]
    Validation { field: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl JotError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        JotError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        JotError::NotFound(what.into())
    }

    /// Create a new sync error
    pub fn sync(message: impl Into<String>) -> Self {
        JotError::Sync(message.into())
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        JotError::Storage(message.into())
    }

    /// Create a new network error
    pub fn network(message: impl Into<String>) -> Self {
        JotError::Network(message.into())
    }

    /// Whether this error is a transient infrastructure failure.
    ///
    /// Transient failures are the class eligible for the offline
    /// fallback: a remote write that fails transiently while the device
    /// is offline is re-issued against the pending store instead of
    /// being surfaced to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            JotError::Network(_) | JotError::Storage(_) | JotError::Unavailable(_)
        )
    }
}

//! Error types for the blob store and message sink adapters.

use std::fmt;
use thiserror::Error;

/// Result type for store and sink operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Adapter-level error. Stage code wraps these in its own typed errors, so
/// every failure stays attributable to one stage and one cause.
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend unreachable or refusing requests
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Adapter misconfigured or built without the required feature
    #[error("store configuration error: {0}")]
    Configuration(String),
}

impl StoreError {
    /// Create a not found error
    pub fn not_found<E: fmt::Display>(key: E) -> Self {
        Self::NotFound(key.to_string())
    }

    /// Create an unavailable error
    pub fn unavailable<E: fmt::Display>(msg: E) -> Self {
        Self::Unavailable(msg.to_string())
    }

    /// Create a configuration error
    pub fn configuration<E: fmt::Display>(msg: E) -> Self {
        Self::Configuration(msg.to_string())
    }

    /// Check if this is a retryable error.
    ///
    /// Transport-shaped failures are worth another attempt; a missing key or
    /// a misconfigured adapter never becomes healthy by waiting.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Unavailable(_))
    }
}

//! Error types for news-ingest
//!
//! This module provides error handling for the library, including:
//! - Transport-level errors (network drops, stream resets)
//! - Protocol errors (malformed upstream messages)
//! - Configuration errors with context about which setting is invalid
//! - Cancellation, modeled as its own variant so the retry engine can
//!   recognize it and never retry it

use thiserror::Error;

/// Result type alias for news-ingest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for news-ingest
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "stream_endpoint")
        key: Option<String>,
    },

    /// Network error from the HTTP transport
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream-level transport failure (connection dropped, stream reset mid-read)
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unparseable upstream message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Session was cancelled by the caller
    #[error("session cancelled")]
    Cancelled,

    /// Retry attempts exhausted; wraps the final failure
    #[error("retries exhausted after {attempts} attempts: {cause}")]
    RetriesExhausted {
        /// Number of retry attempts made before giving up
        attempts: u32,
        /// Description of the final failure
        cause: String,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True if this error represents caller-initiated cancellation.
    ///
    /// Cancellation is never retried and, unless the caller requested an
    /// immediate abort, is not surfaced as an error at all.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

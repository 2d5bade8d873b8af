//! Error types for cache operations
//!
//! Internal seams (backends, strategy handlers, remote clients) report faults
//! through [`CacheError`]. The [`CacheManager`](crate::cache::CacheManager)
//! is the boundary where these are logged, counted and turned into misses.

use crate::cache::types::CacheTier;
use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Connection error - network or connection setup issues
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms: {context}")]
    Timeout { timeout_ms: u64, context: String },

    /// A backend reported a failure it could not recover from
    #[error("{tier} backend error: {message}")]
    Backend { tier: CacheTier, message: String },

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The application-supplied loader failed
    #[error("Loader error: {0}")]
    Loader(String),

    /// Redis driver error (wrapper)
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// HTTP client error (wrapper)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Shorthand for a backend failure on a given tier
    pub fn backend(tier: CacheTier, message: impl Into<String>) -> Self {
        CacheError::Backend {
            tier,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}

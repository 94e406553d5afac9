//! Error types for tonproxy
//!
//! Each layer has its own error enum (`tonapi::Error`, `StoreError`,
//! `PageError`, `UserError`); `ProxyError` wraps them for startup, config
//! and CLI paths. Uses thiserror for ergonomic error handling.

use crate::cache::StoreError;
use crate::pagination::PageError;
use crate::users::UserError;
use thiserror::Error;

/// Result type alias for tonproxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// SQLite database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// TonAPI errors
    #[error("Upstream error: {0}")]
    Upstream(#[from] tonapi::Error),

    /// Transaction cache store errors
    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),

    /// Pagination engine errors
    #[error("Pagination error: {0}")]
    Page(#[from] PageError),

    /// User store errors
    #[error("User store error: {0}")]
    User(#[from] UserError),

    /// Server bind/serve errors
    #[error("Server error: {0}")]
    Server(String),

    /// Other errors
    #[error("{0}")]
    Other(String),

    /// Anyhow errors (for more context)
    #[error("{0:#}")]
    Anyhow(#[from] anyhow::Error),
}

impl ProxyError {
    /// Whether the failure came from upstream throttling
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ProxyError::Upstream(e) => e.is_rate_limited(),
            ProxyError::Page(e) => matches!(e, PageError::RateLimited),
            _ => false,
        }
    }
}

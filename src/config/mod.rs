//! Configuration system
//!
//! Loads ~/.config/tonproxy/config.yaml with support for:
//! - HTTP server address and per-client rate limiting
//! - TonAPI endpoint, key and timeout
//! - SQLite storage location
//! - Transaction paging defaults
//!
//! Environment variables (`TONAPI_URL`, `TONAPI_KEY`, `PORT`, `TONPROXY_DB`)
//! override file values.

mod proxy_config;
pub mod validation;

pub use proxy_config::{
    PaginationConfig, ProxyConfig, RateLimitSettings, ServerConfig, StorageConfig, TonApiConfig,
};
pub use validation::{
    validate_config, validate_config_result, ValidationError, MAX_FETCH_BATCH_SIZE,
};

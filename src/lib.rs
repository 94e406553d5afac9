//! tonproxy - REST proxy for TON blockchain data
//!
//! Mirrors a subset of TonAPI behind a small JSON API and keeps a persistent,
//! append-only cache of each account's transaction history so deep pages
//! are served without re-walking the upstream from the head.
//!
//! # Architecture
//!
//! - **pagination**: the cache engine mapping `(key, limit, page)` to events
//! - **cache**: record store trait with SQLite and in-memory implementations
//! - **upstream**: `EventSource` seam and its TonAPI adapter
//! - **ton**: address, wallet, jetton and NFT lookups over the `tonapi` crate
//! - **users**: user record CRUD
//! - **server**: axum HTTP layer with rate limiting and metrics
//! - **config**: YAML configuration with environment overrides

// Core modules
pub mod cache;
pub mod config;
pub mod error;
pub mod pagination;
pub mod upstream;

// Service and surface
pub mod address;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod ton;
pub mod users;

// Re-exports
pub use error::{ProxyError, Result};

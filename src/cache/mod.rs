//! Cache layer for transaction history
//!
//! Persists, per key, the ordered list of events fetched from upstream
//! together with the cursor for the next (older) batch and an end-of-data
//! flag. Records are append-only: events are never reordered or removed and
//! `is_end` never goes back to false.

mod memory;
mod sqlite;

pub use memory::MemoryCacheStore;
pub use sqlite::{open_connection, SqliteCacheStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An upstream activity item; its shape is not interpreted by the cache
pub type Event = serde_json::Value;

/// Cache store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("store task failed: {0}")]
    Task(String),
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Lifecycle of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// More history may exist upstream
    Partial,
    /// Upstream reported the end of history; terminal
    Complete,
}

/// Cached history for one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: String,
    pub events: Vec<Event>,
    pub cursor: Option<String>,
    pub is_end: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CacheRecord {
    /// Build a fresh record stamped with the current time
    pub fn new(
        key: impl Into<String>,
        events: Vec<Event>,
        cursor: Option<String>,
        is_end: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            events,
            cursor,
            is_end,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> RecordState {
        if self.is_end {
            RecordState::Complete
        } else {
            RecordState::Partial
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Aggregate counters over the whole store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub record_count: usize,
    pub complete_count: usize,
    pub event_count: usize,
}

/// Persistent record store keyed by an opaque identifier
///
/// `append_and_update` must apply the append and the cursor/flag update as
/// one atomic step; on error the stored record is left unchanged.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Load a record, or `None` for an unseen key
    async fn find(&self, key: &str) -> StoreResult<Option<CacheRecord>>;

    /// Insert a new record; fails with `AlreadyExists` if the key is taken
    async fn create(&self, record: CacheRecord) -> StoreResult<CacheRecord>;

    /// Append events at the tail and replace the cursor; `is_end` is sticky
    async fn append_and_update(
        &self,
        key: &str,
        new_events: Vec<Event>,
        new_cursor: Option<String>,
        new_is_end: bool,
    ) -> StoreResult<CacheRecord>;

    async fn stats(&self) -> StoreResult<CacheStats>;
}

//! In-memory cache implementation

use super::{CacheRecord, CacheStats, CacheStore, Event, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Process-local store; contents are lost on drop
#[derive(Default)]
pub struct MemoryCacheStore {
    records: Mutex<HashMap<String, CacheRecord>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn find(&self, key: &str) -> StoreResult<Option<CacheRecord>> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn create(&self, record: CacheRecord) -> StoreResult<CacheRecord> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.key) {
            return Err(StoreError::AlreadyExists(record.key));
        }
        records.insert(record.key.clone(), record.clone());
        Ok(record)
    }

    async fn append_and_update(
        &self,
        key: &str,
        new_events: Vec<Event>,
        new_cursor: Option<String>,
        new_is_end: bool,
    ) -> StoreResult<CacheRecord> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        record.events.extend(new_events);
        record.cursor = new_cursor;
        record.is_end = record.is_end || new_is_end;
        record.updated_at = Utc::now();

        Ok(record.clone())
    }

    async fn stats(&self) -> StoreResult<CacheStats> {
        let records = self.records.lock().await;
        Ok(CacheStats {
            record_count: records.len(),
            complete_count: records.values().filter(|r| r.is_end).count(),
            event_count: records.values().map(|r| r.len()).sum(),
        })
    }
}

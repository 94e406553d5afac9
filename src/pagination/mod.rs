//! Transaction-history pagination cache
//!
//! Maps `(key, limit, page)` to a slice of the cached event list and decides
//! when the cache must grow. Each call does at most one upstream fetch and
//! at most one store write:
//!
//! - unseen key: fetch the newest batch and create the record
//! - page starts past the cached events and the record is not complete:
//!   fetch the next older batch from the stored cursor and append it
//! - anything else: serve from cache
//!
//! Records move `UNSEEN -> PARTIAL -> COMPLETE` and never back.

mod locks;

pub use locks::{KeyGuard, KeyLocks};

use crate::cache::{CacheRecord, CacheStore, Event, StoreError};
use crate::metrics;
use crate::upstream::{EventBatch, EventSource, UpstreamError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Pagination errors
#[derive(Debug, Error)]
pub enum PageError {
    /// Upstream throttled us; the caller may retry later
    #[error("upstream rate limit exceeded")]
    RateLimited,

    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("cache storage failure: {0}")]
    Storage(String),

    #[error("invalid page request: {0}")]
    InvalidRequest(String),
}

impl From<UpstreamError> for PageError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::RateLimited => PageError::RateLimited,
            UpstreamError::Failure(msg) => PageError::UpstreamFailure(msg),
        }
    }
}

impl From<StoreError> for PageError {
    fn from(err: StoreError) -> Self {
        PageError::Storage(err.to_string())
    }
}

/// One page of cached history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub owner: String,
    pub limit: usize,
    pub page: usize,
    pub is_last_page: bool,
    pub events_count: usize,
    pub events: Vec<Event>,
}

impl Page {
    fn from_record(record: &CacheRecord, limit: usize, page: usize, start: usize, end: usize) -> Self {
        let len = record.len();
        let events = record.events[start.min(len)..end.min(len)].to_vec();

        Self {
            owner: record.key.clone(),
            limit,
            page,
            is_last_page: record.is_end && end >= len,
            events_count: len,
            events,
        }
    }
}

/// The pagination cache engine
pub struct PaginationEngine {
    source: Arc<dyn EventSource>,
    store: Arc<dyn CacheStore>,
    fetch_batch_size: usize,
    locks: KeyLocks,
}

impl PaginationEngine {
    pub fn new(
        source: Arc<dyn EventSource>,
        store: Arc<dyn CacheStore>,
        fetch_batch_size: usize,
    ) -> Self {
        Self {
            source,
            store,
            fetch_batch_size: fetch_batch_size.max(1),
            locks: KeyLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Return page `page` (0-indexed) of size `limit` for `key`
    pub async fn get_page(&self, key: &str, limit: usize, page: usize) -> Result<Page, PageError> {
        if limit == 0 {
            return Err(PageError::InvalidRequest("limit must be positive".to_string()));
        }
        let start = page
            .checked_mul(limit)
            .ok_or_else(|| PageError::InvalidRequest("page out of range".to_string()))?;
        let end = start.saturating_add(limit);

        let _guard = self.locks.lock(key).await;

        let record = match self.store.find(key).await? {
            None => self.fetch_initial(key).await?,
            Some(record) if start >= record.len() && !record.is_end => {
                self.extend(record).await?
            }
            Some(record) => {
                if start >= record.len() {
                    metrics::record_cache_exhausted();
                } else {
                    metrics::record_cache_hit();
                }
                debug!(
                    key = %key,
                    page,
                    limit,
                    events_count = record.len(),
                    is_end = record.is_end,
                    "Serving page from cache"
                );
                record
            }
        };

        Ok(Page::from_record(&record, limit, page, start, end))
    }

    async fn fetch_initial(&self, key: &str) -> Result<CacheRecord, PageError> {
        metrics::record_cache_fetch();

        let batch = self.fetch(key, None, "initial").await?;
        let is_end = self.batch_is_end(&batch);
        let record = CacheRecord::new(key, batch.events, batch.next_cursor, is_end);

        match self.store.create(record).await {
            Ok(record) => {
                info!(
                    key = %key,
                    events_count = record.len(),
                    is_end = record.is_end,
                    "Cache record created"
                );
                Ok(record)
            }
            // Another writer created it first; theirs wins
            Err(StoreError::AlreadyExists(_)) => {
                warn!(key = %key, "Cache record created concurrently, re-reading");
                self.store
                    .find(key)
                    .await?
                    .ok_or_else(|| PageError::Storage(format!("record vanished: {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn extend(&self, record: CacheRecord) -> Result<CacheRecord, PageError> {
        metrics::record_cache_fetch();

        let batch = self
            .fetch(&record.key, record.cursor.as_deref(), "extend")
            .await?;
        let is_end = self.batch_is_end(&batch);
        let fetched = batch.events.len();

        let updated = self
            .store
            .append_and_update(&record.key, batch.events, batch.next_cursor, is_end)
            .await?;

        info!(
            key = %record.key,
            fetched,
            events_count = updated.len(),
            is_end = updated.is_end,
            "Cache record extended"
        );
        Ok(updated)
    }

    async fn fetch(
        &self,
        key: &str,
        cursor: Option<&str>,
        kind: &str,
    ) -> Result<EventBatch, PageError> {
        let started = Instant::now();
        let result = self
            .source
            .fetch_events(key, self.fetch_batch_size, cursor)
            .await;
        metrics::record_fetch_duration(kind, started.elapsed().as_secs_f64());

        match result {
            Ok(batch) => {
                metrics::record_upstream_fetch("ok");
                info!(
                    key = %key,
                    kind,
                    fetched = batch.events.len(),
                    has_cursor = batch.next_cursor.is_some(),
                    "Fetched events from upstream"
                );
                Ok(batch)
            }
            Err(UpstreamError::RateLimited) => {
                metrics::record_upstream_fetch("rate_limited");
                warn!(key = %key, kind, "Upstream rate limit hit");
                Err(PageError::RateLimited)
            }
            Err(e) => {
                metrics::record_upstream_fetch("error");
                warn!(key = %key, kind, error = %e, "Upstream fetch failed");
                Err(e.into())
            }
        }
    }

    /// A short batch, or one without a continuation cursor, ends the history
    fn batch_is_end(&self, batch: &EventBatch) -> bool {
        batch.events.len() < self.fetch_batch_size || batch.next_cursor.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStats, MemoryCacheStore, StoreResult};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Upstream with a fixed newest-first history; the cursor is an index
    struct FakeSource {
        history: Vec<Event>,
        calls: AtomicUsize,
        fail_with: Mutex<Option<UpstreamError>>,
        delay: Option<Duration>,
    }

    impl FakeSource {
        fn with_events(count: usize) -> Self {
            Self {
                history: (0..count).map(|i| json!({ "event_id": i })).collect(),
                calls: AtomicUsize::new(0),
                fail_with: Mutex::new(None),
                delay: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn fail_next(&self, err: UpstreamError) {
            *self.fail_with.lock().unwrap() = Some(err);
        }
    }

    #[async_trait]
    impl EventSource for FakeSource {
        async fn fetch_events(
            &self,
            _key: &str,
            fetch_limit: usize,
            cursor: Option<&str>,
        ) -> Result<EventBatch, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.fail_with.lock().unwrap().take() {
                return Err(err);
            }

            let start: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
            let start = start.min(self.history.len());
            let end = (start + fetch_limit).min(self.history.len());
            Ok(EventBatch {
                events: self.history[start..end].to_vec(),
                next_cursor: (end < self.history.len()).then(|| end.to_string()),
            })
        }
    }

    fn ids(page: &Page) -> Vec<u64> {
        page.events
            .iter()
            .map(|e| e["event_id"].as_u64().unwrap())
            .collect()
    }

    fn engine(source: Arc<FakeSource>, store: Arc<dyn CacheStore>) -> PaginationEngine {
        PaginationEngine::new(source, store, 100)
    }

    fn events(range: std::ops::Range<u64>) -> Vec<Event> {
        range.map(|i| json!({ "event_id": i })).collect()
    }

    #[tokio::test]
    async fn test_first_page_fetches_one_batch() {
        let source = Arc::new(FakeSource::with_events(250));
        let store = Arc::new(MemoryCacheStore::new());
        let engine = engine(source.clone(), store.clone());

        let page = engine.get_page("acct", 10, 0).await.unwrap();

        assert_eq!(source.calls(), 1);
        assert_eq!(ids(&page), (0..10).collect::<Vec<_>>());
        assert_eq!(page.events_count, 100);
        assert!(!page.is_last_page);
        assert_eq!(page.owner, "acct");

        let record = store.find("acct").await.unwrap().unwrap();
        assert_eq!(record.len(), 100);
        assert_eq!(record.cursor.as_deref(), Some("100"));
        assert!(!record.is_end);
    }

    #[tokio::test]
    async fn test_page_past_complete_record_is_empty_and_last() {
        let source = Arc::new(FakeSource::with_events(0));
        let store = Arc::new(MemoryCacheStore::new());
        store
            .create(CacheRecord::new("acct", events(0..15), None, true))
            .await
            .unwrap();
        let engine = engine(source.clone(), store);

        let page = engine.get_page("acct", 10, 2).await.unwrap();

        assert!(page.events.is_empty());
        assert!(page.is_last_page);
        assert_eq!(page.events_count, 15);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_page_past_partial_record_fetches_once() {
        let source = Arc::new(FakeSource::with_events(25));
        let store = Arc::new(MemoryCacheStore::new());
        store
            .create(CacheRecord::new("acct", events(0..10), Some("10".into()), false))
            .await
            .unwrap();
        let engine = engine(source.clone(), store.clone());

        let page = engine.get_page("acct", 10, 1).await.unwrap();

        assert_eq!(source.calls(), 1);
        assert_eq!(ids(&page), (10..20).collect::<Vec<_>>());
        assert_eq!(page.events_count, 25);
        // Batch was short, so the record is complete, but page 2 still exists
        assert!(!page.is_last_page);

        let last = engine.get_page("acct", 10, 2).await.unwrap();
        assert_eq!(ids(&last), (20..25).collect::<Vec<_>>());
        assert!(last.is_last_page);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_partially_cached_page_does_not_fetch() {
        let source = Arc::new(FakeSource::with_events(100));
        let store = Arc::new(MemoryCacheStore::new());
        store
            .create(CacheRecord::new("acct", events(0..15), Some("15".into()), false))
            .await
            .unwrap();
        let engine = engine(source.clone(), store);

        let page = engine.get_page("acct", 10, 1).await.unwrap();

        assert_eq!(source.calls(), 0);
        assert_eq!(ids(&page), (10..15).collect::<Vec<_>>());
        assert!(!page.is_last_page);
    }

    #[tokio::test]
    async fn test_repeated_calls_are_identical() {
        let source = Arc::new(FakeSource::with_events(42));
        let engine = engine(source.clone(), Arc::new(MemoryCacheStore::new()));

        let first = engine.get_page("acct", 10, 3).await.unwrap();
        let second = engine.get_page("acct", 10, 3).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_walk_to_end_then_no_more_fetches() {
        let source = Arc::new(FakeSource::with_events(230));
        let engine = engine(source.clone(), Arc::new(MemoryCacheStore::new()));

        let mut last_count = 0;
        let mut seen = Vec::new();
        for page in 0..30 {
            let result = engine.get_page("acct", 10, page).await.unwrap();
            assert!(result.events_count >= last_count);
            last_count = result.events_count;
            seen.extend(ids(&result));
        }

        assert_eq!(seen, (0..230).collect::<Vec<_>>());
        assert_eq!(last_count, 230);
        // 100 + 100 + 30
        assert_eq!(source.calls(), 3);

        let calls = source.calls();
        for page in [0, 5, 22, 23, 40] {
            engine.get_page("acct", 10, page).await.unwrap();
        }
        assert_eq!(source.calls(), calls);

        let tail = engine.get_page("acct", 10, 22).await.unwrap();
        assert!(tail.is_last_page);
        let before_tail = engine.get_page("acct", 10, 21).await.unwrap();
        assert!(!before_tail.is_last_page);
    }

    #[tokio::test]
    async fn test_missing_cursor_ends_history() {
        // Exactly one full batch and no continuation
        let source = Arc::new(FakeSource::with_events(100));
        let engine = engine(source.clone(), Arc::new(MemoryCacheStore::new()));

        let page = engine.get_page("acct", 50, 1).await.unwrap();
        assert!(page.is_last_page);

        let beyond = engine.get_page("acct", 50, 2).await.unwrap();
        assert!(beyond.events.is_empty());
        assert!(beyond.is_last_page);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_far_page_fetches_only_one_batch() {
        let source = Arc::new(FakeSource::with_events(1000));
        let engine = engine(source.clone(), Arc::new(MemoryCacheStore::new()));

        let page = engine.get_page("acct", 10, 50).await.unwrap();

        assert_eq!(source.calls(), 1);
        assert!(page.events.is_empty());
        assert_eq!(page.events_count, 100);
        assert!(!page.is_last_page);
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_share_one_fetch() {
        let mut source = FakeSource::with_events(150);
        source.delay = Some(Duration::from_millis(30));
        let source = Arc::new(source);
        let store = Arc::new(MemoryCacheStore::new());
        let engine = engine(source.clone(), store.clone());

        let requests = (0..4).map(|page| engine.get_page("acct", 10, page));
        let pages = futures::future::join_all(requests).await;

        assert_eq!(source.calls(), 1);
        for (page, result) in pages.into_iter().enumerate() {
            let result = result.unwrap();
            let first = page as u64 * 10;
            assert_eq!(ids(&result), (first..first + 10).collect::<Vec<_>>());
        }
        assert_eq!(store.stats().await.unwrap().record_count, 1);
        assert_eq!(store.stats().await.unwrap().event_count, 100);
    }

    #[tokio::test]
    async fn test_rate_limit_leaves_record_untouched() {
        let source = Arc::new(FakeSource::with_events(150));
        let store = Arc::new(MemoryCacheStore::new());
        let engine = engine(source.clone(), store.clone());

        source.fail_next(UpstreamError::RateLimited);
        let err = engine.get_page("acct", 10, 0).await.unwrap_err();
        assert!(matches!(err, PageError::RateLimited));
        assert!(store.find("acct").await.unwrap().is_none());

        engine.get_page("acct", 10, 0).await.unwrap();
        let before = store.find("acct").await.unwrap().unwrap();

        source.fail_next(UpstreamError::Failure("HTTP 500".into()));
        let err = engine.get_page("acct", 10, 10).await.unwrap_err();
        assert!(matches!(err, PageError::UpstreamFailure(ref m) if m.contains("500")));

        let after = store.find("acct").await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    /// Store whose appends always fail
    struct FailingAppendStore {
        inner: MemoryCacheStore,
    }

    #[async_trait]
    impl CacheStore for FailingAppendStore {
        async fn find(&self, key: &str) -> StoreResult<Option<CacheRecord>> {
            self.inner.find(key).await
        }

        async fn create(&self, record: CacheRecord) -> StoreResult<CacheRecord> {
            self.inner.create(record).await
        }

        async fn append_and_update(
            &self,
            _key: &str,
            _new_events: Vec<Event>,
            _new_cursor: Option<String>,
            _new_is_end: bool,
        ) -> StoreResult<CacheRecord> {
            Err(StoreError::Poisoned)
        }

        async fn stats(&self) -> StoreResult<CacheStats> {
            self.inner.stats().await
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let source = Arc::new(FakeSource::with_events(150));
        let store = Arc::new(FailingAppendStore {
            inner: MemoryCacheStore::new(),
        });
        let engine = engine(source.clone(), store.clone());

        engine.get_page("acct", 10, 0).await.unwrap();
        let err = engine.get_page("acct", 10, 10).await.unwrap_err();
        assert!(matches!(err, PageError::Storage(_)));

        let record = store.find("acct").await.unwrap().unwrap();
        assert_eq!(record.len(), 100);
        assert_eq!(record.cursor.as_deref(), Some("100"));
    }

    /// Store that hides an existing record from the first lookup,
    /// as if another process created it in between
    struct RacingStore {
        inner: MemoryCacheStore,
        hidden_once: AtomicBool,
    }

    #[async_trait]
    impl CacheStore for RacingStore {
        async fn find(&self, key: &str) -> StoreResult<Option<CacheRecord>> {
            if !self.hidden_once.swap(true, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.find(key).await
        }

        async fn create(&self, record: CacheRecord) -> StoreResult<CacheRecord> {
            self.inner.create(record).await
        }

        async fn append_and_update(
            &self,
            key: &str,
            new_events: Vec<Event>,
            new_cursor: Option<String>,
            new_is_end: bool,
        ) -> StoreResult<CacheRecord> {
            self.inner
                .append_and_update(key, new_events, new_cursor, new_is_end)
                .await
        }

        async fn stats(&self) -> StoreResult<CacheStats> {
            self.inner.stats().await
        }
    }

    #[tokio::test]
    async fn test_lost_create_race_uses_winner() {
        let inner = MemoryCacheStore::new();
        inner
            .create(CacheRecord::new("acct", events(500..520), None, true))
            .await
            .unwrap();
        let store = Arc::new(RacingStore {
            inner,
            hidden_once: AtomicBool::new(false),
        });
        let source = Arc::new(FakeSource::with_events(150));
        let engine = engine(source.clone(), store);

        let page = engine.get_page("acct", 10, 0).await.unwrap();

        assert_eq!(source.calls(), 1);
        assert_eq!(ids(&page), (500..510).collect::<Vec<_>>());
        assert_eq!(page.events_count, 20);
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let source = Arc::new(FakeSource::with_events(10));
        let engine = engine(source.clone(), Arc::new(MemoryCacheStore::new()));

        let err = engine.get_page("acct", 0, 0).await.unwrap_err();
        assert!(matches!(err, PageError::InvalidRequest(_)));

        let err = engine.get_page("acct", 2, usize::MAX).await.unwrap_err();
        assert!(matches!(err, PageError::InvalidRequest(_)));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_works_with_sqlite_store() {
        let source = Arc::new(FakeSource::with_events(130));
        let store = Arc::new(crate::cache::SqliteCacheStore::in_memory().unwrap());
        let engine = engine(source.clone(), store.clone());

        // First call only creates the record; the page lies past the first batch
        let first = engine.get_page("acct", 25, 4).await.unwrap();
        assert!(first.events.is_empty());
        assert_eq!(first.events_count, 100);
        assert_eq!(source.calls(), 1);

        let second = engine.get_page("acct", 25, 4).await.unwrap();
        assert_eq!(ids(&second), (100..125).collect::<Vec<_>>());
        assert_eq!(source.calls(), 2);
        assert!(!second.is_last_page);

        let last = engine.get_page("acct", 25, 5).await.unwrap();
        assert_eq!(ids(&last), (125..130).collect::<Vec<_>>());
        assert!(last.is_last_page);
        assert_eq!(source.calls(), 2);
    }
}

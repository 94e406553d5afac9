//! Per-key async locks
//!
//! Serializes read-decide-fetch-append for one key while leaving other keys
//! independent. Entries are dropped from the table once nobody holds or
//! waits on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Table of one async mutex per key
#[derive(Default)]
pub struct KeyLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let mutex = {
            let mut table = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            table.entry(key.to_string()).or_default().clone()
        };

        // Built before waiting so a cancelled wait still cleans up the entry
        let mut guard = KeyGuard {
            locks: self,
            key: key.to_string(),
            guard: None,
        };
        guard.guard = Some(mutex.lock_owned().await);
        guard
    }

    /// Number of keys currently locked or awaited
    pub fn active(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Held while a key is locked or awaited; releases and cleans up on drop
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();

        let mut table = self.locks.inner.lock().unwrap_or_else(|e| e.into_inner());
        // Only the table's own reference left: no holder, no waiter
        if table
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            table.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let locks = KeyLocks::new();
        {
            let _guard = locks.lock("a").await;
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("same").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_leak_entry() {
        let locks = KeyLocks::new();
        let holder = locks.lock("k").await;

        let mut waiter = Box::pin(locks.lock("k"));
        assert!(futures::poll!(&mut waiter).is_pending());

        drop(holder);
        drop(waiter);

        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_waiter_acquires_after_release() {
        let locks = KeyLocks::new();
        let holder = locks.lock("k").await;

        let mut waiter = Box::pin(locks.lock("k"));
        assert!(futures::poll!(&mut waiter).is_pending());

        drop(holder);
        let acquired = waiter.await;
        assert_eq!(locks.active(), 1);

        drop(acquired);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyLocks::new();
        let _a = locks.lock("a").await;
        let _b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b"))
            .await
            .expect("lock on another key should not wait");
        assert_eq!(locks.active(), 2);
    }
}

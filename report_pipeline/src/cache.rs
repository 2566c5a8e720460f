use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use tokio::sync::{Mutex, OnceCell};

pub const DEFAULT_CAPACITY: usize = 1000;

/// Bounded memo of remote lookup results, keyed by the lookup arguments.
///
/// Concurrent callers asking for the same key share one fetch. Failed fetches
/// are not stored, so the next caller tries again. Entries never change once
/// set; the least recently used ones are evicted past `capacity`.
pub struct LookupCache<K, V> {
    name: &'static str,
    entries: Mutex<LruCache<K, Arc<OnceCell<V>>>>,
    hits: AtomicU64,
    fetches: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub fetches: u64,
}

impl<K, V> LookupCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = {
            let mut entries = self.entries.lock().await;
            Arc::clone(entries.get_or_insert(key.clone(), || Arc::new(OnceCell::new())))
        };

        if let Some(value) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value.clone());
        }

        let mut fetched = false;
        let result = cell
            .get_or_try_init(|| {
                fetched = true;
                self.fetches.fetch_add(1, Ordering::Relaxed);
                fetch()
            })
            .await;
        match result {
            Ok(value) => {
                // Waited on another caller's fetch.
                if !fetched {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                }
                Ok(value.clone())
            }
            Err(err) => {
                self.forget_empty(&key, &cell).await;
                Err(err)
            }
        }
    }

    /// Drops the slot for `key` if it still holds this unfilled cell, so a
    /// failed lookup does not occupy capacity.
    async fn forget_empty(&self, key: &K, cell: &Arc<OnceCell<V>>) {
        let mut entries = self.entries.lock().await;
        let stale = entries
            .peek(key)
            .is_some_and(|stored| Arc::ptr_eq(stored, cell) && stored.get().is_none());
        if stale {
            entries.pop(key);
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    async fn counted(calls: &AtomicUsize, value: &str) -> Result<String, String> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value.to_string())
    }

    #[tokio::test]
    async fn repeated_key_is_served_from_memory() {
        let cache: LookupCache<(String, String), String> = LookupCache::new("episodes", 10);
        let calls = AtomicUsize::new(0);
        let key = ("123".to_string(), "01.11.2025".to_string());

        let first = cache
            .get_or_fetch(key.clone(), || counted(&calls, "A"))
            .await
            .unwrap();
        let second = cache
            .get_or_fetch(key, || counted(&calls, "B"))
            .await
            .unwrap();

        assert_eq!(first, "A");
        assert_eq!(second, "A");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, fetches: 1 });
    }

    #[tokio::test]
    async fn least_recently_used_entry_is_evicted() {
        let cache: LookupCache<&str, String> = LookupCache::new("services", 2);
        let calls = AtomicUsize::new(0);

        for key in ["a", "b"] {
            cache.get_or_fetch(key, || counted(&calls, key)).await.unwrap();
        }
        // Touch "a" so "b" becomes the eviction candidate.
        cache.get_or_fetch("a", || counted(&calls, "a")).await.unwrap();
        cache.get_or_fetch("c", || counted(&calls, "c")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.len().await, 2);

        cache.get_or_fetch("a", || counted(&calls, "a")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        cache.get_or_fetch("b", || counted(&calls, "b")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn failures_are_not_remembered() {
        let cache: LookupCache<u32, String> = LookupCache::new("employers", 10);
        let failed: Result<String, String> = cache
            .get_or_fetch(7, || async { Err("boom".to_string()) })
            .await;
        assert_eq!(failed.unwrap_err(), "boom");
        assert!(cache.is_empty().await);

        let calls = AtomicUsize::new(0);
        let value = cache.get_or_fetch(7, || counted(&calls, "ok")).await.unwrap();
        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_fetch() {
        let cache: LookupCache<&str, String> = LookupCache::new("episodes", 10);
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let slow = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, String>("shared".to_string())
        };

        let (a, b) = tokio::join!(
            cache.get_or_fetch("k", slow),
            cache.get_or_fetch("k", slow)
        );
        assert_eq!(a.unwrap(), "shared");
        assert_eq!(b.unwrap(), "shared");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, fetches: 1 });
    }

    #[tokio::test]
    async fn failed_lookups_do_not_evict_cached_entries() {
        let cache: LookupCache<&str, String> = LookupCache::new("episodes", 2);
        let calls = AtomicUsize::new(0);

        cache.get_or_fetch("good", || counted(&calls, "A")).await.unwrap();
        for key in ["bad1", "bad2"] {
            let failed: Result<String, String> = cache
                .get_or_fetch(key, || async { Err("gateway down".to_string()) })
                .await;
            assert!(failed.is_err());
        }
        assert_eq!(cache.len().await, 1);

        let value = cache.get_or_fetch("good", || counted(&calls, "B")).await.unwrap();
        assert_eq!(value, "A");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

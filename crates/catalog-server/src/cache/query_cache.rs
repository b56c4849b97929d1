//! Cache-aside reads for product listings

use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{CacheKeyRegistry, CacheStore};

/// A query result that can be cached
pub trait Cacheable: Serialize + DeserializeOwned {
    /// Empty results are never cached so freshly ingested rows show up at once
    fn is_empty_result(&self) -> bool;
}

/// Cache-aside wrapper that records every key it populates
#[derive(Clone)]
pub struct QueryCache {
    store: Arc<dyn CacheStore>,
    registry: Arc<CacheKeyRegistry>,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(store: Arc<dyn CacheStore>, registry: Arc<CacheKeyRegistry>, ttl: Duration) -> Self {
        Self {
            store,
            registry,
            ttl,
        }
    }

    pub fn registry(&self) -> &CacheKeyRegistry {
        &self.registry
    }

    /// Return the cached value for `key`, or compute, cache and register it.
    ///
    /// Cache failures are logged and fall through to `compute`; only errors
    /// from `compute` itself reach the caller.
    pub async fn get_or_populate<T, E, F, Fut>(&self, key: &str, compute: F) -> Result<T, E>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.store.get(key).await {
            Ok(Some(value)) => match serde_json::from_value::<T>(value) {
                Ok(hit) => {
                    tracing::debug!(cache_key = %key, "Query cache hit");
                    return Ok(hit);
                },
                Err(e) => {
                    tracing::warn!(cache_key = %key, error = %e, "Discarding undecodable cache entry");
                },
            },
            Ok(None) => tracing::debug!(cache_key = %key, "Query cache miss"),
            Err(e) => tracing::warn!(cache_key = %key, error = %e, "Query cache read failed"),
        }

        let result = compute().await?;

        if result.is_empty_result() {
            return Ok(result);
        }

        match serde_json::to_value(&result) {
            Ok(value) => match self.store.set(key, value, self.ttl).await {
                Ok(()) => self.registry.register(key, self.ttl),
                Err(e) => {
                    tracing::warn!(cache_key = %key, error = %e, "Query cache write failed")
                },
            },
            Err(e) => tracing::warn!(cache_key = %key, error = %e, "Failed to encode query result"),
        }

        Ok(result)
    }

    /// Delete every registered key and clear the registry. Returns the number
    /// of keys removed.
    pub async fn invalidate_all(&self) -> usize {
        let keys = self.registry.drain();
        let mut removed = 0;
        for key in &keys {
            match self.store.delete(key).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(cache_key = %key, error = %e, "Failed to invalidate cache key"),
            }
        }
        if !keys.is_empty() {
            tracing::info!(keys = removed, "Invalidated product query cache");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, MemoryCache};
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Names(Vec<String>);

    impl Cacheable for Names {
        fn is_empty_result(&self) -> bool {
            self.0.is_empty()
        }
    }

    fn query_cache(store: Arc<dyn CacheStore>) -> QueryCache {
        QueryCache::new(store, Arc::new(CacheKeyRegistry::new()), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_hit_skips_compute() {
        let cache = query_cache(Arc::new(MemoryCache::new()));
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let names: Result<Names, ()> = cache
                .get_or_populate("products:{}", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Names(vec!["Apple".to_string()]))
                })
                .await;
            assert_eq!(names.unwrap().0, vec!["Apple".to_string()]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.registry().contains("products:{}"));
    }

    #[tokio::test]
    async fn test_empty_result_not_cached() {
        let cache = query_cache(Arc::new(MemoryCache::new()));
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let _: Result<Names, ()> = cache
                .get_or_populate("products:{}", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Names(vec![]))
                })
                .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.registry().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_all_forces_recompute() {
        let store = Arc::new(MemoryCache::new());
        let cache = query_cache(store.clone());

        let _: Result<Names, ()> = cache
            .get_or_populate("a", || async { Ok(Names(vec!["x".to_string()])) })
            .await;
        let _: Result<Names, ()> = cache
            .get_or_populate("b", || async { Ok(Names(vec!["y".to_string()])) })
            .await;

        assert_eq!(cache.invalidate_all().await, 2);
        assert!(cache.registry().is_empty());
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.get("b").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_keys_leave_the_registry() {
        let store = Arc::new(MemoryCache::new());
        let cache = query_cache(store.clone());

        let _: Result<Names, ()> = cache
            .get_or_populate("a", || async { Ok(Names(vec!["x".to_string()])) })
            .await;
        assert_eq!(cache.registry().len(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(cache.registry().is_empty());
        assert_eq!(cache.invalidate_all().await, 0);
    }

    #[tokio::test]
    async fn test_compute_error_propagates() {
        let cache = query_cache(Arc::new(MemoryCache::new()));
        let result: Result<Names, &str> =
            cache.get_or_populate("k", || async { Err("db down") }).await;
        assert_eq!(result.unwrap_err(), "db down");
        assert!(cache.registry().is_empty());
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }

        async fn set(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_broken_store_falls_through() {
        let cache = query_cache(Arc::new(BrokenStore));
        let names: Result<Names, ()> = cache
            .get_or_populate("k", || async { Ok(Names(vec!["Apple".to_string()])) })
            .await;

        assert_eq!(names.unwrap().0.len(), 1);
        // a failed write must not leave a dangling registration
        assert!(cache.registry().is_empty());
    }
}

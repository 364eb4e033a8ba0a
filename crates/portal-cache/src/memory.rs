//! Process-local, map-backed cache

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    cache::{Cache, ValueFactory},
    error::Result,
    item::{caches_anything, CacheItem},
    metrics::{CacheMetrics, CacheStats, OperationTimer},
};

/// In-memory cache
///
/// Two concurrent `get_or_add` calls for the same missing key both run
/// their factory; use [`GlobalAtomicCache`](crate::GlobalAtomicCache) when
/// that matters.
pub struct MemoryCache {
    items: Arc<RwLock<HashMap<String, CacheItem>>>,
    staleness_timeout: Duration,
    metrics: CacheMetrics,
}

impl MemoryCache {
    /// Create a cache whose items stay fresh for `staleness_timeout`
    pub fn new(staleness_timeout: Duration) -> Self {
        Self {
            items: Arc::new(RwLock::new(HashMap::new())),
            staleness_timeout,
            metrics: CacheMetrics::new(),
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    /// Number of stored items, stale ones included
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Fresh value for `key`, evicting a stale item on the way
    async fn lookup(&self, key: &str) -> Option<serde_json::Value> {
        {
            let items = self.items.read().await;
            match items.get(key) {
                Some(item) if item.is_valid() => return Some(item.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut items = self.items.write().await;
        if items.get(key).is_some_and(|item| !item.is_valid()) {
            items.remove(key);
        }
        None
    }
}

impl Default for MemoryCache {
    /// Zero staleness timeout: nothing is ever retained
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.lookup(key).await.is_some())
    }

    async fn add_value(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let mut items = self.items.write().await;
        if caches_anything(self.staleness_timeout) {
            items.insert(key.to_string(), self.create_item(value));
        } else {
            items.remove(key);
        }
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let value = self.lookup(key).await;
        if value.is_some() {
            self.metrics.record_hit();
        } else {
            self.metrics.record_miss();
        }
        Ok(value)
    }

    async fn get_or_add_value(
        &self,
        key: &str,
        factory: ValueFactory,
    ) -> Result<serde_json::Value> {
        if let Some(value) = self.get_value(key).await? {
            return Ok(value);
        }

        let timer = OperationTimer::start();
        let result = factory().await;
        self.metrics
            .record_factory_run(timer.elapsed_ms(), result.is_ok());

        let value = result?;
        self.add_value(key, value.clone()).await?;
        Ok(value)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.items.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.items.write().await.clear();
        Ok(())
    }

    fn staleness_timeout(&self) -> Duration {
        self.staleness_timeout
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{cache::CacheExt, error::CacheError};

    #[tokio::test]
    async fn test_memory_cache_basic_operations() {
        let cache = MemoryCache::new(Duration::from_secs(60));

        cache.add("key1", "value1").await.unwrap();
        let value: Option<String> = cache.get("key1").await.unwrap();
        assert_eq!(value, Some("value1".to_string()));

        assert!(cache.has_key("key1").await.unwrap());
        assert!(!cache.has_key("key2").await.unwrap());

        cache.remove("key1").await.unwrap();
        assert!(!cache.has_key("key1").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache.remove("missing").await.unwrap();
        cache.remove("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_item_is_evicted_on_read() {
        let cache = MemoryCache::new(Duration::from_millis(50));
        cache.add("key1", &1u8).await.unwrap();
        assert_eq!(cache.len().await, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;

        let value: Option<u8> = cache.get("key1").await.unwrap();
        assert_eq!(value, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_zero_timeout_never_caches() {
        let cache = MemoryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let value: u32 = cache
                .get_or_add("token", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7u32)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!cache.has_key("token").await.unwrap());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_or_add_uses_cached_value() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let value: String = cache
                .get_or_add("template", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("<html/>".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "<html/>");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.factory_runs, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_failing_factory_caches_nothing() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        let result: Result<u32> = cache
            .get_or_add("key", || async { Err(CacheError::factory("boom")) })
            .await;

        assert!(matches!(result, Err(CacheError::Factory { .. })));
        assert!(!cache.has_key("key").await.unwrap());
        assert_eq!(cache.stats().factory_failures, 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache.add("a", &1).await.unwrap();
        cache.add("b", &2).await.unwrap();

        cache.clear().await.unwrap();
        assert!(cache.is_empty().await);
    }
}

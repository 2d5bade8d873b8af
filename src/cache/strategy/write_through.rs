use crate::cache::backend::CacheBackend;
use crate::cache::loader::Loader;
use crate::cache::strategy::{EntryPolicy, StrategyHandler};
use crate::cache::types::{CacheStrategy, CacheValue, Lookup};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Synchronous writes to the cache tier and the persistent store
///
/// The two writes run concurrently and are not transactional: when one side
/// fails the other may still have been applied, and the write reports
/// failure.
pub struct WriteThroughHandler {
    cache: Arc<dyn CacheBackend>,
    store: Arc<dyn CacheBackend>,
}

impl WriteThroughHandler {
    pub fn new(cache: Arc<dyn CacheBackend>, store: Arc<dyn CacheBackend>) -> Self {
        Self { cache, store }
    }
}

#[async_trait]
impl StrategyHandler for WriteThroughHandler {
    fn strategy(&self) -> CacheStrategy {
        CacheStrategy::WriteThrough
    }

    async fn get(
        &self,
        key: &str,
        loader: Option<&Loader>,
        policy: &EntryPolicy,
    ) -> Result<Lookup> {
        if let Some(value) = self.cache.get(key).await? {
            return Ok(Lookup::Hit(value));
        }

        if let Some(value) = self.store.get(key).await? {
            debug!(key = key, "Write-through store hit, repopulating cache");
            if let Err(e) = self.cache.set(key, &value, Some(policy.ttl)).await {
                warn!(key = key, "Failed to repopulate cache: {}", e);
            }
            return Ok(Lookup::Loaded(value));
        }

        let loader = match loader {
            Some(loader) => loader,
            None => return Ok(Lookup::Miss),
        };

        match loader.load().await? {
            Some(value) => {
                if !self.set(key, &value, Some(policy.ttl)).await.unwrap_or(false) {
                    warn!(key = key, "Loaded value was not written through");
                }
                Ok(Lookup::Loaded(value))
            }
            None => Ok(Lookup::Miss),
        }
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> Result<bool> {
        let (cached, stored) = tokio::join!(
            self.cache.set(key, value, ttl),
            self.store.set(key, value, ttl)
        );

        match (cached, stored) {
            (Ok(true), Ok(true)) => Ok(true),
            (Err(e), _) | (_, Err(e)) => Err(e),
            (cached, stored) => {
                warn!(
                    key = key,
                    cache_ok = matches!(cached, Ok(true)),
                    store_ok = matches!(stored, Ok(true)),
                    "Write-through incomplete"
                );
                Ok(false)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let (cached, stored) = tokio::join!(self.cache.delete(key), self.store.delete(key));
        Ok(cached? | stored?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::MemoryBackend;
    use crate::cache::strategy::test_support::{counting_loader, FlakyBackend};
    use std::sync::atomic::Ordering;

    fn handler() -> (Arc<MemoryBackend>, Arc<FlakyBackend>, WriteThroughHandler) {
        let cache = Arc::new(MemoryBackend::new(10, Duration::from_secs(60)));
        let store = Arc::new(FlakyBackend::new());
        let handler = WriteThroughHandler::new(cache.clone(), store.clone());
        (cache, store, handler)
    }

    #[tokio::test]
    async fn test_set_writes_both() {
        let (cache, store, handler) = handler();
        assert!(handler.set("k", &"v".into(), None).await.unwrap());
        assert!(cache.get("k").await.unwrap().is_some());
        assert!(store.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_failure_fails_write() {
        let (cache, store, handler) = handler();
        store.fail_writes.store(true, Ordering::SeqCst);

        assert!(handler.set("k", &"v".into(), None).await.is_err());
        // The cache leg is not rolled back
        assert!(cache.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_hit_repopulates_cache() {
        let (cache, store, handler) = handler();
        store.set("k", &"persisted".into(), None).await.unwrap();
        let policy = EntryPolicy::new(Duration::from_secs(60));

        let lookup = handler.get("k", None, &policy).await.unwrap();
        assert_eq!(lookup, Lookup::Loaded("persisted".into()));
        assert_eq!(cache.get("k").await.unwrap(), Some("persisted".into()));
    }

    #[tokio::test]
    async fn test_loader_result_written_through() {
        let (cache, store, handler) = handler();
        let (loader, calls) = counting_loader("loaded");
        let policy = EntryPolicy::new(Duration::from_secs(60));

        handler.get("k", Some(&loader), &policy).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.get("k").await.unwrap().is_some());
        assert!(store.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_both() {
        let (cache, store, handler) = handler();
        handler.set("k", &"v".into(), None).await.unwrap();

        assert!(handler.delete("k").await.unwrap());
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!handler.delete("k").await.unwrap());
    }
}

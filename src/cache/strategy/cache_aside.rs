use crate::cache::backend::CacheBackend;
use crate::cache::loader::Loader;
use crate::cache::strategy::{load_into, EntryPolicy, StrategyHandler};
use crate::cache::types::{CacheStrategy, CacheValue, Lookup};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Application-managed caching: read the cache, fall back to the loader
pub struct CacheAsideHandler {
    cache: Arc<dyn CacheBackend>,
}

impl CacheAsideHandler {
    pub fn new(cache: Arc<dyn CacheBackend>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl StrategyHandler for CacheAsideHandler {
    fn strategy(&self) -> CacheStrategy {
        CacheStrategy::CacheAside
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
        load_into(self.cache.as_ref(), key, loader, policy.ttl).await
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> Result<bool> {
        self.cache.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.cache.delete(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::MemoryBackend;
    use crate::cache::strategy::test_support::counting_loader;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_loader_runs_once() {
        let handler = CacheAsideHandler::new(Arc::new(MemoryBackend::new(
            10,
            Duration::from_secs(60),
        )));
        let (loader, calls) = counting_loader("fresh");
        let policy = EntryPolicy::new(Duration::from_secs(60));

        let first = handler.get("k", Some(&loader), &policy).await.unwrap();
        assert_eq!(first, Lookup::Loaded("fresh".into()));

        let second = handler.get("k", Some(&loader), &policy).await.unwrap();
        assert_eq!(second, Lookup::Hit("fresh".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_miss_without_loader() {
        let handler = CacheAsideHandler::new(Arc::new(MemoryBackend::new(
            10,
            Duration::from_secs(60),
        )));
        let policy = EntryPolicy::new(Duration::from_secs(60));
        assert_eq!(handler.get("k", None, &policy).await.unwrap(), Lookup::Miss);
    }

    #[tokio::test]
    async fn test_loader_failure_propagates_uncached() {
        let cache = Arc::new(MemoryBackend::new(10, Duration::from_secs(60)));
        let handler = CacheAsideHandler::new(cache.clone());
        let loader = Loader::new(|| async { Err(anyhow::anyhow!("upstream 503")) });
        let policy = EntryPolicy::new(Duration::from_secs(60));

        assert!(handler.get("k", Some(&loader), &policy).await.is_err());
        assert_eq!(cache.size().await.unwrap(), 0);
    }
}

use crate::cache::backend::CacheBackend;
use crate::cache::loader::Loader;
use crate::cache::strategy::{load_into, EntryPolicy, StrategyHandler};
use crate::cache::types::{CacheStrategy, CacheValue, Lookup};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Cache-aside reads that reload hot entries before they expire
///
/// A hit past `refresh_threshold` of its TTL spawns one background reload;
/// the caller gets the current value without waiting. Backends that cannot
/// report remaining TTL never trigger a refresh.
pub struct RefreshAheadHandler {
    cache: Arc<dyn CacheBackend>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl RefreshAheadHandler {
    pub fn new(cache: Arc<dyn CacheBackend>) -> Self {
        Self {
            cache,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Number of reloads currently running
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    async fn maybe_refresh(&self, key: &str, loader: &Loader, policy: &EntryPolicy) {
        let remaining = match self.cache.ttl_remaining(key).await {
            Ok(Some(remaining)) => remaining,
            Ok(None) => return,
            Err(e) => {
                debug!(key = key, "TTL lookup failed, skipping refresh: {}", e);
                return;
            }
        };

        let ttl = policy.ttl.as_secs_f64();
        if ttl <= 0.0 {
            return;
        }
        let elapsed = (1.0 - remaining.as_secs_f64() / ttl).clamp(0.0, 1.0);
        if elapsed < policy.refresh_threshold {
            return;
        }

        if !self.in_flight.lock().await.insert(key.to_string()) {
            return;
        }

        debug!(key = key, elapsed = elapsed, "Refreshing entry ahead of expiry");

        let cache = self.cache.clone();
        let in_flight = self.in_flight.clone();
        let loader = loader.clone();
        let key = key.to_string();
        let ttl = policy.ttl;

        tokio::spawn(async move {
            match loader.load().await {
                Ok(Some(value)) => {
                    if let Err(e) = cache.set(&key, &value, Some(ttl)).await {
                        warn!(key = %key, "Failed to store refreshed value: {}", e);
                    }
                }
                Ok(None) => debug!(key = %key, "Refresh loader returned nothing"),
                Err(e) => warn!(key = %key, "Background refresh failed: {}", e),
            }
            in_flight.lock().await.remove(&key);
        });
    }
}

#[async_trait]
impl StrategyHandler for RefreshAheadHandler {
    fn strategy(&self) -> CacheStrategy {
        CacheStrategy::RefreshAhead
    }

    async fn get(
        &self,
        key: &str,
        loader: Option<&Loader>,
        policy: &EntryPolicy,
    ) -> Result<Lookup> {
        if let Some(value) = self.cache.get(key).await? {
            if let Some(loader) = loader {
                self.maybe_refresh(key, loader, policy).await;
            }
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

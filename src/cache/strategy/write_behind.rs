use crate::cache::backend::CacheBackend;
use crate::cache::loader::Loader;
use crate::cache::strategy::{load_into, EntryPolicy, StrategyHandler};
use crate::cache::types::{CacheStrategy, CacheValue, Lookup};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Keys awaiting persistence, oldest first, each queued at most once
#[derive(Debug, Default)]
struct PendingQueue {
    order: VecDeque<String>,
    queued: HashSet<String>,
}

impl PendingQueue {
    fn push(&mut self, key: &str) {
        if self.queued.insert(key.to_string()) {
            self.order.push_back(key.to_string());
        }
    }

    fn remove(&mut self, key: &str) {
        if self.queued.remove(key) {
            self.order.retain(|k| k != key);
        }
    }

    fn take(&mut self, max: usize) -> Vec<String> {
        let count = max.min(self.order.len());
        let batch: Vec<String> = self.order.drain(..count).collect();
        for key in &batch {
            self.queued.remove(key);
        }
        batch
    }
}

/// Asynchronous persistence: writes land in the cache tier and are copied to
/// the store later by [`flush`](Self::flush)
///
/// The queue lives in process memory. Keys still pending when the process
/// dies are never persisted.
pub struct WriteBehindHandler {
    cache: Arc<dyn CacheBackend>,
    store: Arc<dyn CacheBackend>,
    pending: Mutex<PendingQueue>,
    batch_size: usize,
}

impl WriteBehindHandler {
    pub fn new(cache: Arc<dyn CacheBackend>, store: Arc<dyn CacheBackend>, batch_size: usize) -> Self {
        Self {
            cache,
            store,
            pending: Mutex::new(PendingQueue::default()),
            batch_size: batch_size.max(1),
        }
    }

    /// Number of keys waiting to be persisted
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.order.len()
    }

    /// Persist up to one batch of pending keys; returns how many were written
    ///
    /// The value persisted is whatever the cache holds at flush time. Keys
    /// whose cached value is gone are dropped; failed writes are re-queued.
    pub async fn flush(&self) -> usize {
        let batch = self.pending.lock().await.take(self.batch_size);
        if batch.is_empty() {
            return 0;
        }

        let mut persisted = 0;
        let mut retry = Vec::new();

        for key in batch {
            let value = match self.cache.get(&key).await {
                Ok(Some(value)) => value,
                Ok(None) => {
                    debug!(key = %key, "Dropping write-behind key: no longer cached");
                    continue;
                }
                Err(e) => {
                    warn!(key = %key, "Write-behind read failed, will retry: {}", e);
                    retry.push(key);
                    continue;
                }
            };

            let ttl = self.cache.ttl_remaining(&key).await.ok().flatten();
            match self.store.set(&key, &value, ttl).await {
                Ok(true) => persisted += 1,
                Ok(false) => {
                    warn!(key = %key, "Write-behind persist rejected, will retry");
                    retry.push(key);
                }
                Err(e) => {
                    warn!(key = %key, "Write-behind persist failed, will retry: {}", e);
                    retry.push(key);
                }
            }
        }

        if !retry.is_empty() {
            let mut pending = self.pending.lock().await;
            for key in &retry {
                pending.push(key);
            }
        }

        debug!(persisted = persisted, retried = retry.len(), "Write-behind batch flushed");
        persisted
    }

    /// Flush batches until the queue is empty or a batch makes no progress
    pub async fn flush_all(&self) -> usize {
        let mut total = 0;
        while self.pending_len().await > 0 {
            let persisted = self.flush().await;
            if persisted == 0 {
                break;
            }
            total += persisted;
        }
        total
    }

    /// Periodic flush loop; runs until the task is aborted
    pub async fn run_flusher(self: Arc<Self>, interval: Duration) {
        info!("Write-behind flusher started (interval: {:?})", interval);
        loop {
            tokio::time::sleep(interval).await;
            self.flush().await;
        }
    }
}

#[async_trait]
impl StrategyHandler for WriteBehindHandler {
    fn strategy(&self) -> CacheStrategy {
        CacheStrategy::WriteBehind
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
            if let Err(e) = self.cache.set(key, &value, Some(policy.ttl)).await {
                warn!(key = key, "Failed to repopulate cache: {}", e);
            }
            return Ok(Lookup::Loaded(value));
        }

        load_into(self.cache.as_ref(), key, loader, policy.ttl).await
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> Result<bool> {
        let written = self.cache.set(key, value, ttl).await?;
        if written {
            self.pending.lock().await.push(key);
        }
        Ok(written)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.pending.lock().await.remove(key);
        let (cached, stored) = tokio::join!(self.cache.delete(key), self.store.delete(key));
        Ok(cached? | stored?)
    }

    async fn discard_pending(&self, key: &str) {
        self.pending.lock().await.remove(key);
    }
}

//! In-process backend with LRU eviction
//!
//! Every operation goes through one mutex. The tier is meant for local
//! sub-millisecond hits; throughput under contention is not a goal.

use crate::cache::backend::CacheBackend;
use crate::cache::entry::CacheEntry;
use crate::cache::pattern::glob_match;
use crate::cache::types::{CacheTier, CacheValue};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Bounded in-memory cache with strict LRU eviction and lazy expiry
pub struct MemoryBackend {
    max_size: usize,
    default_ttl: Duration,
    store: Mutex<MemoryStore>,
    evictions: AtomicU64,
}

/// Internal cache storage
struct MemoryStore {
    /// Main storage: key -> entry
    entries: HashMap<String, CacheEntry>,

    /// LRU tracking: front is least recently used
    lru_queue: VecDeque<String>,
}

impl MemoryStore {
    fn touch(&mut self, key: &str) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.to_string());
    }

    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru_queue.retain(|k| k != key);
        Some(entry)
    }
}

impl MemoryBackend {
    /// Create a backend holding at most `max_size` entries
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        info!(
            "Initializing memory cache backend (max_size: {}, default_ttl: {:?})",
            max_size, default_ttl
        );

        Self {
            max_size: max_size.max(1),
            default_ttl,
            store: Mutex::new(MemoryStore {
                entries: HashMap::new(),
                lru_queue: VecDeque::new(),
            }),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Copy of a live entry without touching LRU order or hit counts
    pub async fn peek(&self, key: &str) -> Option<CacheEntry> {
        let store = self.store.lock().await;
        store
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .cloned()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn tier(&self) -> CacheTier {
        CacheTier::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let mut store = self.store.lock().await;

        let expired = match store.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => {
                debug!("Memory cache miss: {}", key);
                return Ok(None);
            }
        };

        if expired {
            debug!("Memory cache entry expired: {}", key);
            store.remove_entry(key);
            return Ok(None);
        }

        let value = match store.entries.get_mut(key) {
            Some(entry) => {
                entry.mark_accessed();
                entry.value.clone()
            }
            None => return Ok(None),
        };
        store.touch(key);

        debug!("Memory cache hit: {}", key);
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> Result<bool> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = CacheEntry::new(key.to_string(), value.clone(), CacheTier::Memory, ttl);

        let mut store = self.store.lock().await;

        if store.entries.contains_key(key) {
            debug!("Updating existing memory cache entry: {}", key);
            store.entries.insert(key.to_string(), entry);
            store.touch(key);
            return Ok(true);
        }

        while store.entries.len() >= self.max_size {
            match store.lru_queue.pop_front() {
                Some(victim) => {
                    debug!("Evicting entry due to max_size limit: {}", victim);
                    store.entries.remove(&victim);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }

        debug!("Inserting new memory cache entry: {}", key);
        store.entries.insert(key.to_string(), entry);
        store.lru_queue.push_back(key.to_string());
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut store = self.store.lock().await;
        let removed = store.remove_entry(key).is_some();
        if removed {
            debug!("Removed memory cache entry: {}", key);
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut store = self.store.lock().await;
        let expired = match store.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => return Ok(false),
        };
        if expired {
            store.remove_entry(key);
            return Ok(false);
        }
        Ok(true)
    }

    async fn clear(&self) -> Result<bool> {
        let mut store = self.store.lock().await;
        let count = store.entries.len();
        store.entries.clear();
        store.lru_queue.clear();

        info!("Cleared {} entries from memory cache", count);
        Ok(true)
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.store.lock().await.entries.len())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<Option<usize>> {
        let mut store = self.store.lock().await;
        let matching: Vec<String> = store
            .entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();

        for key in &matching {
            store.remove_entry(key);
        }

        debug!("Removed {} memory cache entries matching {}", matching.len(), pattern);
        Ok(Some(matching.len()))
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        let store = self.store.lock().await;
        Ok(store.entries.get(key).and_then(CacheEntry::remaining_ttl))
    }

    async fn purge_expired(&self) -> usize {
        let mut store = self.store.lock().await;
        let expired: Vec<String> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            store.remove_entry(key);
        }

        if !expired.is_empty() {
            debug!("Cleaned up {} expired memory cache entries", expired.len());
        }
        expired.len()
    }

    fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

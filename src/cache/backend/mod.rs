//! Storage backends behind a uniform contract
//!
//! Every tier implements [`CacheBackend`]. Absence is never an error: a miss
//! is `Ok(None)`, deleting a missing key is `Ok(false)`. `Err` is reserved for
//! genuine I/O or serialization faults, which the manager logs, counts and
//! degrades into a miss.

pub mod cdn;
pub mod codec;
pub mod local;
pub mod memory;
pub mod redis;
pub mod table;

use crate::cache::types::{CacheTier, CacheValue};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use cdn::{CdnBackend, ObjectStore};
pub use local::{LocalKeyValueStore, LocalObjectStore, LocalTableStore, StoredObject};
pub use memory::MemoryBackend;
pub use self::redis::{KeyValueClient, RedisBackend, RedisClient};
pub use table::{TableBackend, TableClient, TableItem};

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Tier this backend serves
    fn tier(&self) -> CacheTier;

    /// Fetch a live value; expired entries read as a miss
    async fn get(&self, key: &str) -> Result<Option<CacheValue>>;

    /// Store a value; `None` TTL uses the backend default
    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> Result<bool>;

    /// Remove a key; safe to repeat
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Existence check; pays the full read cost unless overridden
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Drop everything this backend owns
    async fn clear(&self) -> Result<bool>;

    /// Number of stored entries
    async fn size(&self) -> Result<usize>;

    /// Delete keys matching a glob; `None` when the backend cannot scan
    async fn delete_by_pattern(&self, _pattern: &str) -> Result<Option<usize>> {
        Ok(None)
    }

    /// Time left before a key expires, when the backend can tell
    async fn ttl_remaining(&self, _key: &str) -> Result<Option<Duration>> {
        Ok(None)
    }

    /// Sweep expired entries eagerly; returns how many were removed
    async fn purge_expired(&self) -> usize {
        0
    }

    /// Entries evicted for capacity since construction
    fn evictions(&self) -> u64 {
        0
    }
}

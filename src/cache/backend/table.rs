//! Persistent table tier
//!
//! Items are keyed by `cache_key` and carry their own expiry timestamp so a
//! store-side TTL sweeper (if the store has one) and the read path agree on
//! liveness. Stale items found on read are deleted and reported as a miss.

use crate::cache::backend::codec::{decode_text, encode_text, ValueEncoding};
use crate::cache::backend::CacheBackend;
use crate::cache::config::TableConfig;
use crate::cache::types::{CacheTier, CacheValue};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One stored row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableItem {
    pub cache_key: String,

    /// Encoded payload, see [`ValueEncoding`]
    pub value: String,

    pub encoding: ValueEncoding,

    /// Unix milliseconds
    pub created_at: i64,

    /// Unix milliseconds
    pub expires_at: i64,
}

impl TableItem {
    /// Stale once the clock has passed `expires_at`
    pub fn is_stale(&self) -> bool {
        Utc::now().timestamp_millis() > self.expires_at
    }
}

/// Item-level table operations
#[async_trait]
pub trait TableClient: Send + Sync {
    async fn get_item(&self, table: &str, key: &str) -> Result<Option<TableItem>>;

    async fn put_item(&self, table: &str, item: TableItem) -> Result<()>;

    /// Returns whether an item was removed
    async fn delete_item(&self, table: &str, key: &str) -> Result<bool>;

    /// Every key currently stored in the table
    async fn scan_keys(&self, table: &str) -> Result<Vec<String>>;
}

pub struct TableBackend {
    client: Arc<dyn TableClient>,
    table_name: String,
    default_ttl: Duration,
}

impl TableBackend {
    pub fn new(client: Arc<dyn TableClient>, config: &TableConfig) -> Self {
        info!("Initializing table cache backend (table: {})", config.table_name);
        Self {
            client,
            table_name: config.table_name.clone(),
            default_ttl: config.default_ttl,
        }
    }

    async fn live_item(&self, key: &str) -> Result<Option<TableItem>> {
        let item = match self.client.get_item(&self.table_name, key).await? {
            Some(item) => item,
            None => return Ok(None),
        };

        if item.is_stale() {
            debug!(key = key, "Table cache item expired");
            if let Err(e) = self.client.delete_item(&self.table_name, key).await {
                warn!(key = key, "Failed to delete expired table item: {}", e);
            }
            return Ok(None);
        }

        Ok(Some(item))
    }
}

#[async_trait]
impl CacheBackend for TableBackend {
    fn tier(&self) -> CacheTier {
        CacheTier::Database
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        match self.live_item(key).await? {
            Some(item) => Ok(Some(decode_text(&item.value, Some(item.encoding))?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> Result<bool> {
        let (text, encoding) = encode_text(value)?;
        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        let item = TableItem {
            cache_key: key.to_string(),
            value: text,
            encoding,
            created_at: now,
            expires_at: now.saturating_add(ttl_ms),
        };

        self.client.put_item(&self.table_name, item).await?;
        debug!(key = key, "Table cache SET");
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.client.delete_item(&self.table_name, key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live_item(key).await?.is_some())
    }

    async fn clear(&self) -> Result<bool> {
        let keys = self.client.scan_keys(&self.table_name).await?;
        for key in &keys {
            self.client.delete_item(&self.table_name, key).await?;
        }
        info!("Cleared {} entries from table cache", keys.len());
        Ok(true)
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.client.scan_keys(&self.table_name).await?.len())
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.live_item(key).await?.map(|item| {
            let left = item.expires_at - Utc::now().timestamp_millis();
            Duration::from_millis(left.max(0) as u64)
        }))
    }
}

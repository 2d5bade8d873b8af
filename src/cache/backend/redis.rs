//! Network key-value tier
//!
//! [`RedisBackend`] speaks to any [`KeyValueClient`]. The production client
//! wraps a `redis` multiplexed connection (single node or cluster); tests and
//! local runs use [`LocalKeyValueStore`](super::LocalKeyValueStore).

use crate::cache::backend::codec::{decode_bytes, encode_bytes};
use crate::cache::backend::CacheBackend;
use crate::cache::config::RedisConfig;
use crate::cache::types::{CacheTier, CacheValue};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use redis::FromRedisValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Minimal command surface the redis tier needs
#[async_trait]
pub trait KeyValueClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store with a millisecond expiry
    async fn set_px(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Returns whether the key existed
    async fn del(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remaining lifetime; `None` for missing keys or keys without expiry
    async fn pttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Delete every key matching a glob, returning how many went
    async fn delete_matching(&self, pattern: &str) -> Result<usize>;

    async fn count_matching(&self, pattern: &str) -> Result<usize>;
}

/// `redis` driver client over any async connection
///
/// `C` is a `ConnectionManager` for a single node or a `ClusterConnection`
/// in cluster mode. Every command is bounded by the response timeout.
#[derive(Clone)]
pub struct RedisClient<C> {
    conn: C,
    response_timeout: Duration,
    cluster: bool,
}

impl<C> std::fmt::Debug for RedisClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("response_timeout", &self.response_timeout)
            .field("cluster", &self.cluster)
            .finish()
    }
}

impl<C> RedisClient<C>
where
    C: redis::aio::ConnectionLike + Clone + Send + Sync + 'static,
{
    pub fn new(conn: C, response_timeout: Duration) -> Self {
        Self {
            conn,
            response_timeout,
            cluster: false,
        }
    }

    /// Mark the connection as a cluster connection
    ///
    /// Cluster mode lists keys with `KEYS` (fanned out to every primary by the
    /// driver) and deletes them one at a time to avoid cross-slot errors.
    pub fn clustered(mut self) -> Self {
        self.cluster = true;
        self
    }

    async fn run<T: FromRedisValue>(&self, cmd: redis::Cmd, context: &str) -> Result<T> {
        let mut conn = self.conn.clone();
        match tokio::time::timeout(self.response_timeout, cmd.query_async(&mut conn)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CacheError::Timeout {
                timeout_ms: self.response_timeout.as_millis() as u64,
                context: context.to_string(),
            }),
        }
    }

    async fn matching_keys(&self, pattern: &str) -> Result<Vec<String>> {
        if self.cluster {
            let mut cmd = redis::cmd("KEYS");
            cmd.arg(pattern);
            return self.run(cmd, "KEYS").await;
        }

        // SCAN iterates without blocking the server
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100);
            let (next_cursor, batch): (u64, Vec<String>) = self.run(cmd, "SCAN").await?;
            keys.extend(batch);

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl<C> KeyValueClient for RedisClient<C>
where
    C: redis::aio::ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run(cmd, "GET").await
    }

    async fn set_px(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let millis = (ttl.as_millis() as u64).max(1);
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("PX").arg(millis);
        self.run::<()>(cmd, "SET").await
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let removed: u64 = self.run(cmd, "DEL").await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(key);
        let count: u64 = self.run(cmd, "EXISTS").await?;
        Ok(count > 0)
    }

    async fn pttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut cmd = redis::cmd("PTTL");
        cmd.arg(key);
        let millis: i64 = self.run(cmd, "PTTL").await?;
        // -2 means missing, -1 means no expiry
        if millis < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_millis(millis as u64)))
        }
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        let keys = self.matching_keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut deleted: u64 = 0;
        if self.cluster {
            for key in &keys {
                let mut cmd = redis::cmd("DEL");
                cmd.arg(key);
                deleted += self.run::<u64>(cmd, "DEL").await?;
            }
        } else {
            for chunk in keys.chunks(100) {
                let mut cmd = redis::cmd("DEL");
                cmd.arg(chunk);
                deleted += self.run::<u64>(cmd, "DEL (batch)").await?;
            }
        }

        debug!(pattern = pattern, deleted = deleted, "Redis pattern DEL");
        Ok(deleted as usize)
    }

    async fn count_matching(&self, pattern: &str) -> Result<usize> {
        Ok(self.matching_keys(pattern).await?.len())
    }
}

/// Open a connection according to `config`
pub async fn connect(config: &RedisConfig) -> Result<Arc<dyn KeyValueClient>> {
    let url = config.url();

    if config.cluster_mode {
        let client = redis::cluster::ClusterClient::new(vec![url.clone()])?;
        let conn = tokio::time::timeout(config.connect_timeout, client.get_async_connection())
            .await
            .map_err(|_| CacheError::Timeout {
                timeout_ms: config.connect_timeout.as_millis() as u64,
                context: format!("connecting to redis cluster {}", redact_url(&url)),
            })?
            .map_err(|e| {
                CacheError::Connection(format!("Failed to connect to Redis cluster: {}", e))
            })?;

        info!(url = %redact_url(&url), "Connected to Redis cluster");
        return Ok(Arc::new(
            RedisClient::new(conn, config.response_timeout).clustered(),
        ));
    }

    let client = redis::Client::open(url.as_str())
        .map_err(|e| CacheError::Connection(format!("Failed to create Redis client: {}", e)))?;
    let conn = tokio::time::timeout(
        config.connect_timeout,
        redis::aio::ConnectionManager::new(client),
    )
    .await
    .map_err(|_| CacheError::Timeout {
        timeout_ms: config.connect_timeout.as_millis() as u64,
        context: format!("connecting to redis {}", redact_url(&url)),
    })?
    .map_err(|e| CacheError::Connection(format!("Failed to connect to Redis: {}", e)))?;

    info!(url = %redact_url(&url), "Connected to Redis");
    Ok(Arc::new(RedisClient::new(conn, config.response_timeout)))
}

/// Redact credentials from a Redis URL for logging
fn redact_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if colon_pos > "redis:".len() {
                return format!("{}***{}", &url[..=colon_pos], &url[at_pos..]);
            }
        }
    }
    url.to_string()
}

/// Cache tier over a key-value client, namespaced by a key prefix
pub struct RedisBackend {
    client: Arc<dyn KeyValueClient>,
    key_prefix: String,
    default_ttl: Duration,
}

impl RedisBackend {
    pub fn new(client: Arc<dyn KeyValueClient>, key_prefix: impl Into<String>, default_ttl: Duration) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            default_ttl,
        }
    }

    pub fn from_config(client: Arc<dyn KeyValueClient>, config: &RedisConfig) -> Self {
        Self::new(client, config.key_prefix.clone(), config.default_ttl)
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn tier(&self) -> CacheTier {
        CacheTier::Redis
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let value = self.client.get(&self.full_key(key)).await?;
        match value {
            Some(bytes) => {
                debug!(key = key, "Redis cache HIT");
                Ok(Some(decode_bytes(&bytes)))
            }
            None => {
                debug!(key = key, "Redis cache MISS");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> Result<bool> {
        let bytes = encode_bytes(value)?;
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.client.set_px(&self.full_key(key), bytes, ttl).await?;
        debug!(key = key, ttl_ms = ttl.as_millis() as u64, "Redis cache SET");
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.client.del(&self.full_key(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.client.exists(&self.full_key(key)).await
    }

    /// Removes only keys under this backend's prefix; other data in the
    /// database is left alone
    async fn clear(&self) -> Result<bool> {
        let deleted = self
            .client
            .delete_matching(&format!("{}*", self.key_prefix))
            .await?;
        info!("Cleared {} entries from redis cache", deleted);
        Ok(true)
    }

    async fn size(&self) -> Result<usize> {
        self.client
            .count_matching(&format!("{}*", self.key_prefix))
            .await
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<Option<usize>> {
        let deleted = self.client.delete_matching(&self.full_key(pattern)).await?;
        Ok(Some(deleted))
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        self.client.pttl(&self.full_key(key)).await
    }
}

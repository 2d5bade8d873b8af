//! In-process stand-ins for the remote stores
//!
//! Used for local development and tests. Each store can be switched
//! offline, after which every call fails with a connection error.

use crate::cache::backend::cdn::ObjectStore;
use crate::cache::backend::redis::KeyValueClient;
use crate::cache::backend::table::{TableClient, TableItem};
use crate::cache::pattern::glob_match;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

fn check_online(offline: &AtomicBool, store: &str) -> Result<()> {
    if offline.load(Ordering::SeqCst) {
        Err(CacheError::Connection(format!("{} is offline", store)))
    } else {
        Ok(())
    }
}

/// Key-value store with millisecond expiry and glob scans
#[derive(Debug, Default)]
pub struct LocalKeyValueStore {
    data: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
    offline: AtomicBool,
}

impl LocalKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn purge(data: &mut HashMap<String, (Vec<u8>, Instant)>) {
        let now = Instant::now();
        data.retain(|_, (_, deadline)| *deadline > now);
    }
}

#[async_trait]
impl KeyValueClient for LocalKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        check_online(&self.offline, "key-value store")?;
        let mut data = self.data.lock().await;
        Self::purge(&mut data);
        Ok(data.get(key).map(|(value, _)| value.clone()))
    }

    async fn set_px(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        check_online(&self.offline, "key-value store")?;
        let deadline = Instant::now() + ttl.max(Duration::from_millis(1));
        self.data
            .lock()
            .await
            .insert(key.to_string(), (value, deadline));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        check_online(&self.offline, "key-value store")?;
        let mut data = self.data.lock().await;
        Self::purge(&mut data);
        Ok(data.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        check_online(&self.offline, "key-value store")?;
        let mut data = self.data.lock().await;
        Self::purge(&mut data);
        Ok(data.contains_key(key))
    }

    async fn pttl(&self, key: &str) -> Result<Option<Duration>> {
        check_online(&self.offline, "key-value store")?;
        let mut data = self.data.lock().await;
        Self::purge(&mut data);
        Ok(data
            .get(key)
            .map(|(_, deadline)| deadline.saturating_duration_since(Instant::now())))
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        check_online(&self.offline, "key-value store")?;
        let mut data = self.data.lock().await;
        Self::purge(&mut data);
        let before = data.len();
        data.retain(|key, _| !glob_match(pattern, key));
        Ok(before - data.len())
    }

    async fn count_matching(&self, pattern: &str) -> Result<usize> {
        check_online(&self.offline, "key-value store")?;
        let mut data = self.data.lock().await;
        Self::purge(&mut data);
        Ok(data.keys().filter(|key| glob_match(pattern, key)).count())
    }
}

/// Table store holding items per table name; never expires items itself
#[derive(Debug, Default)]
pub struct LocalTableStore {
    tables: Mutex<HashMap<String, HashMap<String, TableItem>>>,
    offline: AtomicBool,
}

impl LocalTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl TableClient for LocalTableStore {
    async fn get_item(&self, table: &str, key: &str) -> Result<Option<TableItem>> {
        check_online(&self.offline, "table store")?;
        let tables = self.tables.lock().await;
        Ok(tables.get(table).and_then(|items| items.get(key)).cloned())
    }

    async fn put_item(&self, table: &str, item: TableItem) -> Result<()> {
        check_online(&self.offline, "table store")?;
        self.tables
            .lock()
            .await
            .entry(table.to_string())
            .or_default()
            .insert(item.cache_key.clone(), item);
        Ok(())
    }

    async fn delete_item(&self, table: &str, key: &str) -> Result<bool> {
        check_online(&self.offline, "table store")?;
        let mut tables = self.tables.lock().await;
        Ok(tables
            .get_mut(table)
            .map(|items| items.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn scan_keys(&self, table: &str) -> Result<Vec<String>> {
        check_online(&self.offline, "table store")?;
        let tables = self.tables.lock().await;
        let mut keys: Vec<String> = tables
            .get(table)
            .map(|items| items.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort_unstable();
        Ok(keys)
    }
}

/// Object as uploaded to the origin
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
    pub cache_control: String,
}

/// Origin store that records uploads
#[derive(Debug, Default)]
pub struct LocalObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl LocalObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> Result<()> {
        self.objects.lock().await.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
                cache_control: cache_control.to_string(),
            },
        );
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().await.remove(key).is_some())
    }
}

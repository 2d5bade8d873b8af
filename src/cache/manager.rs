//! Cache orchestration
//!
//! [`CacheManager`] owns every backend, the strategy handlers bound to them,
//! the tag index and the metrics. It is the only public entry point and the
//! boundary where faults stop: nothing it exposes returns an error. Backend
//! failures are logged, counted and reported as a miss or a failed write.

use crate::cache::backend::{
    self, CacheBackend, CdnBackend, KeyValueClient, LocalKeyValueStore, LocalObjectStore,
    LocalTableStore, MemoryBackend, ObjectStore, RedisBackend, TableBackend, TableClient,
};
use crate::cache::config::CacheConfig;
use crate::cache::invalidation::{InvalidationHandler, InvalidationReason};
use crate::cache::keys::CacheKeyBuilder;
use crate::cache::loader::Loader;
use crate::cache::metrics::{CacheMetrics, MetricsSnapshot};
use crate::cache::profile::{CacheProfile, ProfileTable};
use crate::cache::strategy::{
    self, CacheAsideHandler, EntryPolicy, RefreshAheadHandler, StrategyHandler,
    WriteBehindHandler, WriteThroughHandler,
};
use crate::cache::types::{CacheStrategy, CacheTier, CacheValue, Lookup};
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Raw store clients handed to the manager at construction
///
/// A tier is built only when it is configured and its client is present.
#[derive(Clone, Default)]
pub struct CacheClients {
    pub key_value: Option<Arc<dyn KeyValueClient>>,
    pub table: Option<Arc<dyn TableClient>>,
    pub object_store: Option<Arc<dyn ObjectStore>>,
}

impl CacheClients {
    /// No remote clients; only the memory tier (and a read-only CDN) can be built
    pub fn none() -> Self {
        Self::default()
    }

    /// In-process stand-ins for every remote store
    pub fn local() -> Self {
        Self {
            key_value: Some(Arc::new(LocalKeyValueStore::new())),
            table: Some(Arc::new(LocalTableStore::new())),
            object_store: Some(Arc::new(LocalObjectStore::new())),
        }
    }

    /// Connect the clients the configuration asks for
    ///
    /// Only the key-value store is connected from configuration; table and
    /// object-store clients come from the application via the `with_*` methods.
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        let mut clients = Self::none();
        if let Some(redis) = &config.redis {
            clients.key_value = Some(backend::redis::connect(redis).await?);
        }
        Ok(clients)
    }

    pub fn with_key_value(mut self, client: Arc<dyn KeyValueClient>) -> Self {
        self.key_value = Some(client);
        self
    }

    pub fn with_table(mut self, client: Arc<dyn TableClient>) -> Self {
        self.table = Some(client);
        self
    }

    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }
}

/// Snapshot returned by [`CacheManager::get_status`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub backends: Vec<CacheTier>,
    pub strategies: Vec<CacheStrategy>,
    pub tracked_tags: usize,
    pub pending_writes: usize,
    pub metrics: MetricsSnapshot,
}

type HandlerKey = (CacheTier, CacheStrategy);

pub struct CacheManager {
    config: CacheConfig,
    backends: HashMap<CacheTier, Arc<dyn CacheBackend>>,
    handlers: HashMap<HandlerKey, Arc<dyn StrategyHandler>>,
    write_behind: Vec<Arc<WriteBehindHandler>>,
    keys: CacheKeyBuilder,
    invalidation: InvalidationHandler,
    metrics: CacheMetrics,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheManager {
    /// Build backends and bind strategy handlers
    pub fn new(config: CacheConfig, clients: CacheClients) -> Result<Self> {
        config.validate()?;

        let mut backends: HashMap<CacheTier, Arc<dyn CacheBackend>> = HashMap::new();

        backends.insert(
            CacheTier::Memory,
            Arc::new(MemoryBackend::new(
                config.memory.max_size,
                config.memory.default_ttl,
            )),
        );

        match (&config.redis, clients.key_value) {
            (Some(redis), Some(client)) => {
                backends.insert(
                    CacheTier::Redis,
                    Arc::new(RedisBackend::from_config(client, redis)),
                );
            }
            (Some(_), None) => warn!("Redis tier configured without a client; tier disabled"),
            _ => {}
        }

        match (&config.table, clients.table) {
            (Some(table), Some(client)) => {
                backends.insert(
                    CacheTier::Database,
                    Arc::new(TableBackend::new(client, table)),
                );
            }
            (Some(_), None) => warn!("Table tier configured without a client; tier disabled"),
            _ => {}
        }

        if let Some(cdn) = &config.cdn {
            backends.insert(
                CacheTier::Cdn,
                Arc::new(CdnBackend::new(cdn, clients.object_store)?),
            );
        }

        let mut handlers: HashMap<HandlerKey, Arc<dyn StrategyHandler>> = HashMap::new();
        let mut write_behind = Vec::new();
        let store = backends.get(&CacheTier::Database).cloned();

        for (tier, backend) in &backends {
            handlers.insert(
                (*tier, CacheStrategy::CacheAside),
                Arc::new(CacheAsideHandler::new(backend.clone())),
            );

            if let Some(store) = store.as_ref().filter(|_| *tier != CacheTier::Database) {
                handlers.insert(
                    (*tier, CacheStrategy::WriteThrough),
                    Arc::new(WriteThroughHandler::new(backend.clone(), store.clone())),
                );

                let behind = Arc::new(WriteBehindHandler::new(
                    backend.clone(),
                    store.clone(),
                    config.write_behind_batch_size,
                ));
                write_behind.push(behind.clone());
                handlers.insert((*tier, CacheStrategy::WriteBehind), behind);
            }

            if config.background_refresh {
                handlers.insert(
                    (*tier, CacheStrategy::RefreshAhead),
                    Arc::new(RefreshAheadHandler::new(backend.clone())),
                );
            }
        }

        let tiers: BTreeSet<CacheTier> = backends.keys().copied().collect();
        info!(
            "Cache manager initialized (tiers: {:?}, handlers: {})",
            tiers,
            handlers.len()
        );

        Ok(Self {
            keys: CacheKeyBuilder::new(config.namespace.clone(), config.key_version.clone()),
            config,
            backends,
            handlers,
            write_behind,
            invalidation: InvalidationHandler::new(),
            metrics: CacheMetrics::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Key builder configured with this manager's namespace and version
    pub fn keys(&self) -> &CacheKeyBuilder {
        &self.keys
    }

    pub fn profiles(&self) -> &ProfileTable {
        &self.config.profiles
    }

    /// Backend serving a concrete tier, if configured
    pub fn backend(&self, tier: CacheTier) -> Option<Arc<dyn CacheBackend>> {
        self.backends.get(&tier).cloned()
    }

    fn resolve_profile(&self, name: &str) -> CacheProfile {
        self.config.profiles.resolve(name, self.config.default_ttl)
    }

    fn hybrid_backends(&self) -> impl Iterator<Item = &Arc<dyn CacheBackend>> {
        CacheTier::HYBRID_ORDER
            .iter()
            .filter_map(move |tier| self.backends.get(tier))
    }

    /// Read a key through its profile's tier and strategy
    ///
    /// Returns the value and whether it was served by a cache tier (as opposed
    /// to the loader). Any failure is reported as `(None, false)`.
    pub async fn get(
        &self,
        key: &str,
        profile: &str,
        loader: Option<&Loader>,
    ) -> (Option<CacheValue>, bool) {
        let start = Instant::now();
        let profile = self.resolve_profile(profile);
        let policy =
            EntryPolicy::new(profile.ttl()).with_refresh_threshold(profile.refresh_threshold);

        let result = if profile.tier == CacheTier::Hybrid {
            self.hybrid_get(key, loader, &policy).await
        } else {
            self.tier_get(profile.tier, profile.strategy, key, loader, &policy)
                .await
        };

        let outcome = match result {
            Ok((Lookup::Hit(value), tier)) => {
                self.metrics.record_hit(tier);
                (Some(value), true)
            }
            Ok((lookup, _)) => {
                self.metrics.record_miss();
                lookup.into_parts()
            }
            Err(e) => {
                error!(key = key, "Cache get failed: {}", e);
                self.metrics.record_error();
                self.metrics.record_miss();
                (None, false)
            }
        };

        self.metrics.record_get_time(start.elapsed());
        outcome
    }

    async fn tier_get(
        &self,
        tier: CacheTier,
        strategy: CacheStrategy,
        key: &str,
        loader: Option<&Loader>,
        policy: &EntryPolicy,
    ) -> Result<(Lookup, CacheTier)> {
        let backend = match self.backends.get(&tier) {
            Some(backend) => backend,
            None => {
                debug!(key = key, tier = %tier, "Tier not configured, loading uncached");
                let lookup = match loader {
                    Some(loader) => match loader.load().await? {
                        Some(value) => Lookup::Loaded(value),
                        None => Lookup::Miss,
                    },
                    None => Lookup::Miss,
                };
                return Ok((lookup, tier));
            }
        };

        if let Some(handler) = self.handlers.get(&(tier, strategy)) {
            return Ok((handler.get(key, loader, policy).await?, tier));
        }

        debug!(key = key, tier = %tier, strategy = %strategy, "No handler bound, reading backend directly");
        if let Some(value) = backend.get(key).await? {
            return Ok((Lookup::Hit(value), tier));
        }
        let lookup = strategy::load_into(backend.as_ref(), key, loader, policy.ttl).await?;
        Ok((lookup, tier))
    }

    /// Probe memory, then redis, then the table store
    ///
    /// A hit in a slower tier is copied into every faster tier that missed.
    /// A full miss runs the loader and stores its value in every tier.
    async fn hybrid_get(
        &self,
        key: &str,
        loader: Option<&Loader>,
        policy: &EntryPolicy,
    ) -> Result<(Lookup, CacheTier)> {
        let mut missed: Vec<&Arc<dyn CacheBackend>> = Vec::new();

        for backend in self.hybrid_backends() {
            match backend.get(key).await {
                Ok(Some(value)) => {
                    for upper in &missed {
                        if let Err(e) = upper.set(key, &value, Some(policy.ttl)).await {
                            warn!(key = key, tier = %upper.tier(), "Failed to promote entry: {}", e);
                            self.metrics.record_error();
                        }
                    }
                    if !missed.is_empty() {
                        debug!(key = key, tier = %backend.tier(), promoted = missed.len(), "Promoted entry to faster tiers");
                    }
                    return Ok((Lookup::Hit(value), backend.tier()));
                }
                Ok(None) => missed.push(backend),
                Err(e) => {
                    warn!(key = key, tier = %backend.tier(), "Hybrid probe failed: {}", e);
                    self.metrics.record_error();
                }
            }
        }

        let loader = match loader {
            Some(loader) => loader,
            None => return Ok((Lookup::Miss, CacheTier::Hybrid)),
        };

        match loader.load().await? {
            Some(value) => {
                for backend in self.hybrid_backends() {
                    if let Err(e) = backend.set(key, &value, Some(policy.ttl)).await {
                        warn!(key = key, tier = %backend.tier(), "Failed to store loaded value: {}", e);
                        self.metrics.record_error();
                    }
                }
                Ok((Lookup::Loaded(value), CacheTier::Hybrid))
            }
            None => Ok((Lookup::Miss, CacheTier::Hybrid)),
        }
    }

    /// Read and deserialize; a payload of the wrong shape counts as an error and a miss
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        key: &str,
        profile: &str,
        loader: Option<&Loader>,
    ) -> (Option<T>, bool) {
        match self.get(key, profile, loader).await {
            (Some(value), hit) => match value.deserialize::<T>() {
                Ok(typed) => (Some(typed), hit),
                Err(e) => {
                    warn!(key = key, "Cached value has unexpected shape: {}", e);
                    self.metrics.record_error();
                    (None, false)
                }
            },
            (None, _) => (None, false),
        }
    }

    /// Write a value through its profile's tier and strategy
    ///
    /// `ttl` and `tags` override the profile's when given. Tags are registered
    /// before the write, so an invalidation racing the write still sees the key.
    pub async fn set(
        &self,
        key: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
        profile: &str,
        tags: Option<&[String]>,
    ) -> bool {
        let start = Instant::now();
        let profile = self.resolve_profile(profile);
        let ttl = self.config.ttl_with_jitter(ttl.unwrap_or_else(|| profile.ttl()));

        let tags = tags.unwrap_or(profile.tags.as_slice());
        self.invalidation.register_tag(key, tags).await;

        let result = if profile.tier == CacheTier::Hybrid {
            self.hybrid_set(key, value, ttl).await
        } else {
            self.tier_set(profile.tier, profile.strategy, key, value, ttl)
                .await
        };

        let stored = match result {
            Ok(stored) => stored,
            Err(e) => {
                error!(key = key, "Cache set failed: {}", e);
                self.metrics.record_error();
                false
            }
        };

        if stored {
            self.metrics.record_set();
        }
        self.metrics.record_set_time(start.elapsed());
        stored
    }

    async fn tier_set(
        &self,
        tier: CacheTier,
        strategy: CacheStrategy,
        key: &str,
        value: &CacheValue,
        ttl: Duration,
    ) -> Result<bool> {
        let backend = match self.backends.get(&tier) {
            Some(backend) => backend,
            None => {
                warn!(key = key, tier = %tier, "Write to unconfigured tier skipped");
                return Ok(false);
            }
        };

        match self.handlers.get(&(tier, strategy)) {
            Some(handler) => handler.set(key, value, Some(ttl)).await,
            None => backend.set(key, value, Some(ttl)).await,
        }
    }

    async fn hybrid_set(&self, key: &str, value: &CacheValue, ttl: Duration) -> Result<bool> {
        let mut all_stored = true;
        for backend in self.hybrid_backends() {
            match backend.set(key, value, Some(ttl)).await {
                Ok(true) => {}
                Ok(false) => all_stored = false,
                Err(e) => {
                    warn!(key = key, tier = %backend.tier(), "Hybrid write failed: {}", e);
                    self.metrics.record_error();
                    all_stored = false;
                }
            }
        }
        Ok(all_stored)
    }

    /// Serialize and write
    pub async fn set_as<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        profile: &str,
        tags: Option<&[String]>,
    ) -> bool {
        match CacheValue::from_serializable(value) {
            Ok(value) => self.set(key, &value, ttl, profile, tags).await,
            Err(e) => {
                error!(key = key, "Value could not be serialized: {}", e);
                self.metrics.record_error();
                false
            }
        }
    }

    /// Remove a key from every tier and every index
    ///
    /// Returns whether any tier held the key; deleting an absent key is a
    /// harmless `false`.
    pub async fn delete(&self, key: &str) -> bool {
        self.remove_key(key, &InvalidationReason::Manual).await
    }

    async fn remove_key(&self, key: &str, reason: &InvalidationReason) -> bool {
        let mut removed = false;

        for backend in self.backends.values() {
            match backend.delete(key).await {
                Ok(true) => removed = true,
                Ok(false) => {}
                Err(e) => {
                    warn!(key = key, tier = %backend.tier(), "Delete failed: {}", e);
                    self.metrics.record_error();
                }
            }
        }

        for handler in self.handlers.values() {
            handler.discard_pending(key).await;
        }
        self.invalidation.unregister_key(key).await;
        self.metrics.record_delete();

        debug!(key = key, removed = removed, "Removed key ({})", reason);
        removed
    }

    /// Existence check on one tier, or on any of memory, redis and table when `None`
    pub async fn exists(&self, key: &str, tier: Option<CacheTier>) -> bool {
        let candidates: Vec<&Arc<dyn CacheBackend>> = match tier {
            Some(tier) if tier.is_concrete() => self.backends.get(&tier).into_iter().collect(),
            _ => self.hybrid_backends().collect(),
        };

        for backend in candidates {
            match backend.exists(key).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    warn!(key = key, tier = %backend.tier(), "Exists check failed: {}", e);
                    self.metrics.record_error();
                }
            }
        }
        false
    }

    /// Clear one tier, or every tier except the CDN (plus the tag index) when `None`
    pub async fn clear(&self, tier: Option<CacheTier>) -> bool {
        let targets: Vec<&Arc<dyn CacheBackend>> = match tier {
            Some(CacheTier::Hybrid) => self.hybrid_backends().collect(),
            Some(tier) => match self.backends.get(&tier) {
                Some(backend) => vec![backend],
                None => {
                    warn!(tier = %tier, "Clear of unconfigured tier skipped");
                    return false;
                }
            },
            None => self
                .backends
                .values()
                .filter(|backend| backend.tier() != CacheTier::Cdn)
                .collect(),
        };

        let mut all_cleared = true;
        for backend in targets {
            match backend.clear().await {
                Ok(cleared) => all_cleared &= cleared,
                Err(e) => {
                    error!(tier = %backend.tier(), "Clear failed: {}", e);
                    self.metrics.record_error();
                    all_cleared = false;
                }
            }
        }

        if tier.is_none() {
            self.invalidation.clear().await;
        }

        info!("Cache cleared ({})", InvalidationReason::Cleared);
        all_cleared
    }

    /// Delete every key written under `tag`; returns how many were removed
    ///
    /// The tag's entry is consumed: keys written under it afterwards register
    /// fresh.
    pub async fn invalidate_by_tag(&self, tag: &str) -> usize {
        let keys = self.invalidation.take_tag(tag).await;
        let reason = InvalidationReason::TagMatch {
            tag: tag.to_string(),
        };

        let mut removed = 0;
        for key in &keys {
            if self.remove_key(key, &reason).await {
                removed += 1;
            }
        }

        info!(
            "Invalidated {} of {} keys ({})",
            removed,
            keys.len(),
            reason
        );
        removed
    }

    /// Delete keys matching a glob in every tier that can scan
    ///
    /// The count is summed across tiers, so a key held by both memory and
    /// redis counts twice. Tiers without pattern support contribute nothing.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> usize {
        let mut removed = 0;

        for backend in self.backends.values() {
            match backend.delete_by_pattern(pattern).await {
                Ok(Some(count)) => removed += count,
                Ok(None) => {}
                Err(e) => {
                    warn!(tier = %backend.tier(), pattern = pattern, "Pattern delete failed: {}", e);
                    self.metrics.record_error();
                }
            }
        }

        self.invalidation.forget_matching(pattern).await;

        let reason = InvalidationReason::Pattern {
            pattern: pattern.to_string(),
        };
        info!("Invalidated {} entries ({})", removed, reason);
        removed
    }

    /// Drop every key built for a user
    pub async fn invalidate_user_cache(&self, user_id: &str) -> usize {
        let pattern = self.keys.build_user_pattern(user_id);
        self.invalidate_by_pattern(&pattern).await
    }

    /// Populate keys from their loaders, one at a time
    ///
    /// Loader failures are logged per key; the count of keys stored is the
    /// only aggregate result.
    pub async fn warm_cache(&self, entries: Vec<(String, Loader)>, profile: &str) -> usize {
        let total = entries.len();
        let mut warmed = 0;

        for (key, loader) in entries {
            match loader.load().await {
                Ok(Some(value)) => {
                    if self.set(&key, &value, None, profile, None).await {
                        warmed += 1;
                    }
                }
                Ok(None) => debug!(key = %key, "Warm loader returned nothing"),
                Err(e) => {
                    warn!(key = %key, "Warm loader failed: {}", e);
                    self.metrics.record_error();
                }
            }
        }

        info!("Warmed {}/{} cache entries", warmed, total);
        warmed
    }

    pub async fn get_metrics(&self) -> MetricsSnapshot {
        let evictions = self.backends.values().map(|b| b.evictions()).sum();
        self.metrics.snapshot(evictions)
    }

    pub async fn get_status(&self) -> CacheStatus {
        let backends: BTreeSet<CacheTier> = self.backends.keys().copied().collect();
        let strategies: BTreeSet<CacheStrategy> =
            self.handlers.keys().map(|(_, strategy)| *strategy).collect();

        CacheStatus {
            backends: backends.into_iter().collect(),
            strategies: strategies.into_iter().collect(),
            tracked_tags: self.invalidation.tag_count().await,
            pending_writes: self.pending_writes().await,
            metrics: self.get_metrics().await,
        }
    }

    /// Keys waiting in write-behind queues
    pub async fn pending_writes(&self) -> usize {
        let mut pending = 0;
        for handler in &self.write_behind {
            pending += handler.pending_len().await;
        }
        pending
    }

    /// Drain every write-behind queue now; returns how many keys were persisted
    pub async fn flush_write_behind(&self) -> usize {
        let mut persisted = 0;
        for handler in &self.write_behind {
            persisted += handler.flush_all().await;
        }
        persisted
    }

    /// Spawn write-behind flushers, the metrics reporter and the expiry sweeper
    ///
    /// Workers hold a weak reference and stop once the manager is dropped.
    pub async fn start_background_tasks(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("Background tasks already running");
            return;
        }

        for handler in &self.write_behind {
            tasks.push(tokio::spawn(
                handler.clone().run_flusher(self.config.write_behind_interval),
            ));
        }

        if self.config.enable_metrics {
            let manager = Arc::downgrade(self);
            let interval = self.config.metrics_interval;
            tasks.push(tokio::spawn(report_metrics(manager, interval)));
        }

        if self.config.enable_cleanup {
            let manager = Arc::downgrade(self);
            let interval = self.config.cleanup_interval;
            tasks.push(tokio::spawn(sweep_expired(manager, interval)));
        }

        info!("Started {} cache background tasks", tasks.len());
    }

    /// Flush pending writes and stop background workers
    pub async fn shutdown(&self) {
        let persisted = self.flush_write_behind().await;
        let remaining = self.pending_writes().await;
        if remaining > 0 {
            warn!("{} write-behind keys could not be persisted before shutdown", remaining);
        }

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }

        info!("Cache manager shut down (flushed {} pending writes)", persisted);
    }
}

async fn report_metrics(manager: Weak<CacheManager>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        let manager = match manager.upgrade() {
            Some(manager) => manager,
            None => return,
        };
        let snapshot = manager.get_metrics().await;
        info!(
            hit_ratio = snapshot.hit_ratio(),
            hits = snapshot.hits,
            misses = snapshot.misses,
            errors = snapshot.errors,
            "Cache metrics"
        );
    }
}

async fn sweep_expired(manager: Weak<CacheManager>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        let manager = match manager.upgrade() {
            Some(manager) => manager,
            None => return,
        };
        let mut purged = 0;
        for backend in manager.backends.values() {
            purged += backend.purge_expired().await;
        }
        if purged > 0 {
            debug!("Expiry sweep removed {} entries", purged);
        }
    }
}

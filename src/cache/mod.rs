//! # Multi-tier caching
//!
//! A cache manager fronting up to four storage tiers, selected per call
//! through named profiles.
//!
//! ## Features
//!
//! - **Tiers**: in-process LRU memory, a redis key-value store, a persistent
//!   table store and an edge/CDN store, plus a virtual hybrid tier that probes
//!   memory, redis and table in order and promotes hits upward
//! - **Strategies**: cache-aside, write-through, write-behind (batched,
//!   background flushed) and refresh-ahead
//! - **Profiles**: tier, strategy, TTL and tags bundled under a name and
//!   editable as JSON
//! - **Invalidation**: by key, by tag and by glob pattern
//! - **Metrics**: hit/miss counters, per-tier hits and latency averages
//! - **Adapters**: `cached`, `cache_result`, `conditional_cache`,
//!   `invalidate_cache` and `memoize` wrap operations at the call site
//!
//! Cache faults never reach callers: a broken tier shows up as misses,
//! failed writes and a rising error count.
//!
//! ## Example
//!
//! ```no_run
//! use nutri_cache::cache::{CacheClients, CacheConfig, CacheManager, Loader};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = CacheConfig::from_env()?;
//! let clients = CacheClients::connect(&config).await?;
//! let manager = Arc::new(CacheManager::new(config, clients)?);
//! manager.start_background_tasks().await;
//!
//! let loader = Loader::typed(|| async { Ok(Some(vec!["oats", "berries"])) });
//! let (plan, hit) = manager.get("plan:42", "meal_plan", Some(&loader)).await;
//! println!("plan: {:?} (hit: {})", plan, hit);
//!
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod decorators;
pub mod entry;
pub mod integration;
pub mod invalidation;
pub mod keys;
pub mod loader;
pub mod manager;
pub mod metrics;
pub mod pattern;
pub mod profile;
pub mod strategy;
pub mod types;

pub use backend::CacheBackend;
pub use config::{CacheConfig, CacheConfigBuilder, CdnConfig, MemoryConfig, RedisConfig, TableConfig};
pub use decorators::{
    cache_result, cached, conditional_cache, invalidate_cache, memoize, Cached, ConditionalCached,
    InvalidateCache, Memoized,
};
pub use entry::CacheEntry;
pub use integration::{ApiResponseCache, MealPlanCache, SessionCache, UserDataCache};
pub use invalidation::{InvalidationHandler, InvalidationReason};
pub use keys::{hash_params, CacheKeyBuilder};
pub use loader::Loader;
pub use manager::{CacheClients, CacheManager, CacheStatus};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use profile::{CacheProfile, ProfileTable, DEFAULT_PROFILE};
pub use strategy::{EntryPolicy, StrategyHandler};
pub use types::{CacheStrategy, CacheTier, CacheValue, Lookup};

//! # Nutri Cache (nutri-cache)
//!
//! Multi-tier caching core for the nutrition coaching platform.
//!
//! ## Features
//!
//! - Memory, redis, table-store and CDN tiers behind one manager
//! - Hybrid reads with promotion of lower-tier hits
//! - Cache-aside, write-through, write-behind and refresh-ahead strategies
//! - Named profiles binding tier, strategy, TTL and tags per use case
//! - Tag and glob-pattern invalidation
//! - Call-site adapters for caching and memoizing operations
//! - Faults degrade to misses; they never surface as errors at the manager
//!
//! ## Quick Start
//!
//! The manager is built once at startup and shared as an `Arc`:
//!
//! ```no_run
//! use nutri_cache::{CacheClients, CacheConfig, CacheManager};
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CacheConfig::from_env()?;
//!     let clients = CacheClients::connect(&config).await?;
//!     let manager = Arc::new(CacheManager::new(config, clients)?);
//!
//!     let tags = vec!["user".to_string(), "user:1".to_string()];
//!     manager
//!         .set_as("u:1", &json!({"name": "Ann"}), Some(Duration::from_secs(60)), "user_data", Some(&tags))
//!         .await;
//!
//!     let (value, hit) = manager.get("u:1", "user_data", None).await;
//!     println!("{:?} (hit: {})", value, hit);
//!
//!     manager.invalidate_by_tag("user:1").await;
//!     Ok(())
//! }
//! ```
//!
//! ## Caching an Operation
//!
//! ```no_run
//! use nutri_cache::cache::cached;
//! use nutri_cache::{CacheClients, CacheConfig, CacheManager};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = Arc::new(CacheManager::new(CacheConfig::default(), CacheClients::none())?);
//!
//!     let bmr = cached(manager, "bmr").ttl(Duration::from_secs(3600));
//!     let value: f64 = bmr
//!         .call(&(70.0, 175.0, 30), || async { Ok::<_, anyhow::Error>(1650.0) })
//!         .await?;
//!     println!("BMR: {}", value);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;

// Re-export main types for convenience
pub use cache::{
    CacheBackend, CacheClients, CacheConfig, CacheConfigBuilder, CacheKeyBuilder, CacheManager,
    CacheProfile, CacheStatus, CacheStrategy, CacheTier, CacheValue, Loader, MetricsSnapshot,
    ProfileTable,
};
pub use error::{CacheError, Result};

//! Read/write algorithms layered over backends
//!
//! A handler is bound to one tier at manager construction. Handlers see
//! backend faults as `Err` and pass them up; the manager decides how to
//! degrade.

pub mod cache_aside;
pub mod refresh_ahead;
pub mod write_behind;
pub mod write_through;

pub use cache_aside::CacheAsideHandler;
pub use refresh_ahead::RefreshAheadHandler;
pub use write_behind::WriteBehindHandler;
pub use write_through::WriteThroughHandler;

use crate::cache::backend::CacheBackend;
use crate::cache::loader::Loader;
use crate::cache::types::{CacheStrategy, CacheValue, Lookup};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// Per-call settings taken from the resolved profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryPolicy {
    /// TTL applied to values produced by a loader
    pub ttl: Duration,

    /// Fraction of the TTL after which refresh-ahead reloads (0.0 - 1.0)
    pub refresh_threshold: f64,
}

impl EntryPolicy {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            refresh_threshold: 0.8,
        }
    }

    pub fn with_refresh_threshold(mut self, threshold: f64) -> Self {
        self.refresh_threshold = threshold;
        self
    }
}

#[async_trait]
pub trait StrategyHandler: Send + Sync {
    fn strategy(&self) -> CacheStrategy;

    async fn get(
        &self,
        key: &str,
        loader: Option<&Loader>,
        policy: &EntryPolicy,
    ) -> Result<Lookup>;

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Forget any deferred work for a key
    async fn discard_pending(&self, _key: &str) {}
}

/// Run the loader and store its result in `cache`
///
/// A failed cache write is logged; the loaded value is still returned.
pub(crate) async fn load_into(
    cache: &dyn CacheBackend,
    key: &str,
    loader: Option<&Loader>,
    ttl: Duration,
) -> Result<Lookup> {
    let loader = match loader {
        Some(loader) => loader,
        None => return Ok(Lookup::Miss),
    };

    match loader.load().await? {
        Some(value) => {
            match cache.set(key, &value, Some(ttl)).await {
                Ok(true) => {}
                Ok(false) => warn!(key = key, tier = %cache.tier(), "Loaded value was not cached"),
                Err(e) => warn!(key = key, tier = %cache.tier(), "Failed to cache loaded value: {}", e),
            }
            Ok(Lookup::Loaded(value))
        }
        None => Ok(Lookup::Miss),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::cache::backend::CacheBackend;
    use crate::cache::loader::Loader;
    use crate::cache::types::{CacheTier, CacheValue};
    use crate::error::{CacheError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Backend whose writes can be made to fail
    #[derive(Default)]
    pub struct FlakyBackend {
        pub inner: Option<crate::cache::backend::MemoryBackend>,
        pub fail_writes: AtomicBool,
        pub writes: AtomicUsize,
    }

    impl FlakyBackend {
        pub fn new() -> Self {
            Self {
                inner: Some(crate::cache::backend::MemoryBackend::new(
                    100,
                    Duration::from_secs(60),
                )),
                ..Default::default()
            }
        }

        fn inner(&self) -> &crate::cache::backend::MemoryBackend {
            self.inner.as_ref().unwrap()
        }
    }

    #[async_trait]
    impl CacheBackend for FlakyBackend {
        fn tier(&self) -> CacheTier {
            CacheTier::Database
        }

        async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
            self.inner().get(key).await
        }

        async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> Result<bool> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(CacheError::backend(CacheTier::Database, "write rejected"));
            }
            self.inner().set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner().delete(key).await
        }

        async fn clear(&self) -> Result<bool> {
            self.inner().clear().await
        }

        async fn size(&self) -> Result<usize> {
            self.inner().size().await
        }
    }

    /// Loader returning `value` and counting invocations
    pub fn counting_loader(value: &'static str) -> (Loader, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let loader = Loader::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Some(CacheValue::from(value)))
            }
        });
        (loader, calls)
    }
}

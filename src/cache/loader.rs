//! Loader callbacks consulted on cache misses

use crate::cache::types::CacheValue;
use crate::error::{CacheError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type LoadFn = dyn Fn() -> BoxFuture<'static, anyhow::Result<Option<CacheValue>>> + Send + Sync;

/// Produces the authoritative value for a key
///
/// Cheap to clone; refresh-ahead keeps a clone to reload entries in the
/// background after the caller has moved on.
#[derive(Clone)]
pub struct Loader {
    inner: Arc<LoadFn>,
}

impl Loader {
    /// Wrap an async function returning a cache value (or `None` when there is nothing to cache)
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<CacheValue>>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move || f().boxed()),
        }
    }

    /// Wrap an async function returning any serializable value
    pub fn typed<F, Fut, T>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        Self::new(move || {
            let fut = f();
            async move {
                match fut.await? {
                    Some(value) => Ok(Some(CacheValue::from_serializable(&value)?)),
                    None => Ok(None),
                }
            }
        })
    }

    /// Run the loader, mapping its failure into a cache error
    pub async fn load(&self) -> Result<Option<CacheValue>> {
        (self.inner)()
            .await
            .map_err(|e| CacheError::Loader(format!("{:#}", e)))
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader").finish_non_exhaustive()
    }
}

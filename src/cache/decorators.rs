//! Call-site adapters that put an operation behind the cache
//!
//! Each adapter is built once, configured with builder methods, and then
//! wraps calls through `call` (async operations) or `call_sync` (plain
//! closures). Arguments are passed as any `Serialize` value and keys are
//! derived from their JSON form:
//!
//! ```no_run
//! # use nutri_cache::cache::{cached, CacheManager};
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! # async fn example(manager: Arc<CacheManager>) -> anyhow::Result<()> {
//! let calories = cached(manager.clone(), "daily_calories")
//!     .ttl(Duration::from_secs(600))
//!     .key_template("calories:{user_id}:{date}");
//!
//! let args = serde_json::json!({ "user_id": "42", "date": "2024-05-01" });
//! let total: u32 = calories
//!     .call(&args, || async { Ok::<_, anyhow::Error>(2150) })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! An `Err` from the wrapped operation is returned unchanged and nothing is
//! cached for that call.

use crate::cache::backend::{CacheBackend, MemoryBackend};
use crate::cache::keys::hash_params;
use crate::cache::manager::CacheManager;
use crate::cache::profile::DEFAULT_PROFILE;
use crate::cache::types::CacheValue;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type KeyFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

#[derive(Clone)]
enum KeySource {
    /// `build_computed_key(name, args)`
    Derived,
    Template(String),
    Function(KeyFn),
}

/// Fill `{name}` placeholders from the fields of `args`
///
/// Object arguments are looked up by field name, array arguments by index,
/// and a scalar argument answers to `{0}`. Returns `None` when a placeholder
/// has no matching argument.
pub fn fill_template(template: &str, args: &Value) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}')?;
        let name = &after[..close];

        let field = match args {
            Value::Object(map) => map.get(name),
            Value::Array(items) => name.parse::<usize>().ok().and_then(|i| items.get(i)),
            scalar if name == "0" => Some(scalar),
            _ => None,
        }?;

        match field {
            Value::String(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    Some(out)
}

/// Cache an operation's successful results under keys derived from its arguments
#[derive(Clone)]
pub struct Cached {
    manager: Arc<CacheManager>,
    name: String,
    ttl: Option<Duration>,
    profile: String,
    tags: Option<Vec<String>>,
    key: KeySource,
}

/// Start configuring a cached operation named `name`
pub fn cached(manager: Arc<CacheManager>, name: impl Into<String>) -> Cached {
    Cached {
        manager,
        name: name.into(),
        ttl: None,
        profile: DEFAULT_PROFILE.to_string(),
        tags: None,
        key: KeySource::Derived,
    }
}

/// Cached operation whose key comes from a caller-supplied function
pub fn cache_result<F>(manager: Arc<CacheManager>, name: impl Into<String>, key_fn: F) -> Cached
where
    F: Fn(&Value) -> String + Send + Sync + 'static,
{
    cached(manager, name).key_with(key_fn)
}

/// Cached operation that stores only results accepted by `predicate`
pub fn conditional_cache<T, P>(
    manager: Arc<CacheManager>,
    name: impl Into<String>,
    predicate: P,
) -> ConditionalCached<T>
where
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    cached(manager, name).when(predicate)
}

impl Cached {
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Build keys from a `{field}` template filled with the arguments
    pub fn key_template(mut self, template: impl Into<String>) -> Self {
        self.key = KeySource::Template(template.into());
        self
    }

    pub fn key_with<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.key = KeySource::Function(Arc::new(key_fn));
        self
    }

    /// Only cache results accepted by `predicate`
    pub fn when<T, P>(self, predicate: P) -> ConditionalCached<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        ConditionalCached {
            inner: self,
            predicate: Arc::new(predicate),
        }
    }

    /// Key the given arguments map to; `None` when they cannot be serialized
    pub fn key_for<A: Serialize + ?Sized>(&self, args: &A) -> Option<String> {
        let args = match serde_json::to_value(args) {
            Ok(args) => args,
            Err(e) => {
                warn!(name = %self.name, "Arguments not serializable, bypassing cache: {}", e);
                return None;
            }
        };

        let key = match &self.key {
            KeySource::Derived => self.manager.keys().build_computed_key(&self.name, &args),
            KeySource::Template(template) => match fill_template(template, &args) {
                Some(key) => key,
                None => {
                    warn!(name = %self.name, template = %template, "Key template does not match arguments, deriving key");
                    self.manager.keys().build_computed_key(&self.name, &args)
                }
            },
            KeySource::Function(key_fn) => key_fn(&args),
        };
        Some(key)
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.manager.get_as::<T>(key, &self.profile, None).await {
            (Some(value), true) => {
                debug!(name = %self.name, key = key, "Cached call hit");
                Some(value)
            }
            _ => None,
        }
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T) {
        let stored = self
            .manager
            .set_as(key, value, self.ttl, &self.profile, self.tags.as_deref())
            .await;
        if !stored {
            debug!(name = %self.name, key = key, "Result was not cached");
        }
    }

    async fn run<A, T, E, Fut>(
        &self,
        args: &A,
        op: impl FnOnce() -> Fut,
        accept: Option<&(dyn Fn(&T) -> bool + Send + Sync)>,
    ) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = match self.key_for(args) {
            Some(key) => key,
            None => return op().await,
        };

        if let Some(value) = self.lookup::<T>(&key).await {
            return Ok(value);
        }

        let value = op().await?;
        if accept.map_or(true, |accept| accept(&value)) {
            self.store(&key, &value).await;
        }
        Ok(value)
    }

    /// Run an async operation through the cache
    pub async fn call<A, T, E, F, Fut>(&self, args: &A, op: F) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(args, op, None).await
    }

    /// Run a synchronous operation through the cache
    pub async fn call_sync<A, T, E, F>(&self, args: &A, op: F) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        self.run(args, || std::future::ready(op()), None).await
    }
}

/// [`Cached`] with a predicate deciding which results are stored
pub struct ConditionalCached<T> {
    inner: Cached,
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T> ConditionalCached<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.inner = self.inner.ttl(ttl);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.inner = self.inner.profile(profile);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner = self.inner.tags(tags);
        self
    }

    pub fn key_template(mut self, template: impl Into<String>) -> Self {
        self.inner = self.inner.key_template(template);
        self
    }

    pub async fn call<A, E, F, Fut>(&self, args: &A, op: F) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.inner.run(args, op, Some(self.predicate.as_ref())).await
    }

    pub async fn call_sync<A, E, F>(&self, args: &A, op: F) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        F: FnOnce() -> Result<T, E>,
    {
        self.inner
            .run(args, || std::future::ready(op()), Some(self.predicate.as_ref()))
            .await
    }
}

/// Invalidate tags and key patterns after an operation succeeds
#[derive(Clone)]
pub struct InvalidateCache {
    manager: Arc<CacheManager>,
    tags: Vec<String>,
    patterns: Vec<String>,
}

pub fn invalidate_cache(manager: Arc<CacheManager>) -> InvalidateCache {
    InvalidateCache {
        manager,
        tags: Vec::new(),
        patterns: Vec::new(),
    }
}

impl InvalidateCache {
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Glob patterns, optionally with `{field}` placeholders filled from the arguments
    pub fn patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    async fn invalidate<A: Serialize + ?Sized>(&self, args: &A) -> usize {
        let mut removed = 0;
        for tag in &self.tags {
            removed += self.manager.invalidate_by_tag(tag).await;
        }

        if self.patterns.is_empty() {
            return removed;
        }

        let args = serde_json::to_value(args).unwrap_or(Value::Null);
        for template in &self.patterns {
            match fill_template(template, &args) {
                Some(pattern) => removed += self.manager.invalidate_by_pattern(&pattern).await,
                None => warn!(pattern = %template, "Invalidation pattern does not match arguments, skipped"),
            }
        }
        removed
    }

    pub async fn call<A, T, E, F, Fut>(&self, args: &A, op: F) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = op().await?;
        let removed = self.invalidate(args).await;
        debug!(removed = removed, "Invalidated cache after successful call");
        Ok(value)
    }

    pub async fn call_sync<A, T, E, F>(&self, args: &A, op: F) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        F: FnOnce() -> Result<T, E>,
    {
        let value = op()?;
        self.invalidate(args).await;
        Ok(value)
    }
}

/// Lifetime of memoized results
const MEMO_TTL: Duration = Duration::from_secs(365 * 24 * 3600);

/// Process-local memoization with an LRU bound, independent of any manager
pub struct Memoized {
    store: MemoryBackend,
}

pub fn memoize(max_size: usize) -> Memoized {
    Memoized {
        store: MemoryBackend::new(max_size, MEMO_TTL),
    }
}

impl Memoized {
    fn key_for<A: Serialize + ?Sized>(args: &A) -> Option<String> {
        serde_json::to_value(args).ok().map(|args| hash_params(&args))
    }

    async fn run<A, T, E, Fut>(&self, args: &A, op: impl FnOnce() -> Fut) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = match Self::key_for(args) {
            Some(key) => key,
            None => return op().await,
        };

        let cached = self.store.get(&key).await.ok().flatten();
        if let Some(value) = cached.and_then(|value| value.deserialize::<T>().ok()) {
            return Ok(value);
        }

        let value = op().await?;
        match CacheValue::from_serializable(&value) {
            Ok(encoded) => match self.store.set(&key, &encoded, None).await {
                Ok(true) => {}
                Ok(false) => debug!(key = %key, "Memoized result was not stored"),
                Err(e) => warn!(key = %key, "Failed to memoize result: {}", e),
            },
            Err(e) => warn!(key = %key, "Result not serializable, not memoized: {}", e),
        }
        Ok(value)
    }

    pub async fn call<A, T, E, F, Fut>(&self, args: &A, op: F) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(args, op).await
    }

    pub async fn call_sync<A, T, E, F>(&self, args: &A, op: F) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        self.run(args, || std::future::ready(op())).await
    }

    /// Number of memoized results
    pub async fn len(&self) -> usize {
        self.store.size().await.unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        match self.store.clear().await {
            Ok(true) => {}
            Ok(false) => debug!("Memoized results were not cleared"),
            Err(e) => warn!("Failed to clear memoized results: {}", e),
        }
    }
}

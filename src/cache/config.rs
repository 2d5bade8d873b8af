//! Configuration for the cache system

use crate::cache::profile::ProfileTable;
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration consumed when the cache manager is constructed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL used when neither the caller nor the profile supplies one
    pub default_ttl: Duration,

    /// TTL jitter factor (0.0 - 1.0)
    /// Adds random variation to spread out expiry of entries written together
    pub ttl_jitter: f64,

    /// In-process tier
    pub memory: MemoryConfig,

    /// Network key-value tier, absent when not deployed
    pub redis: Option<RedisConfig>,

    /// Persistent table tier, absent when not deployed
    pub table: Option<TableConfig>,

    /// Edge/content tier, absent when not deployed
    pub cdn: Option<CdnConfig>,

    /// Leading segment of every built key
    pub namespace: String,

    /// Key schema version, bumped to orphan old keys
    pub key_version: String,

    /// Enable the periodic metrics reporter
    pub enable_metrics: bool,

    /// Interval between metrics reports
    pub metrics_interval: Duration,

    /// Enable the expired-entry sweeper
    pub enable_cleanup: bool,

    /// Interval between sweeps
    pub cleanup_interval: Duration,

    /// Allow refresh-ahead handlers to reload entries in the background
    pub background_refresh: bool,

    /// Maximum keys persisted per write-behind drain
    pub write_behind_batch_size: usize,

    /// Interval between write-behind drains
    pub write_behind_interval: Duration,

    /// Named cache profiles
    pub profiles: ProfileTable,
}

/// In-process LRU tier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of entries before LRU eviction
    pub max_size: usize,

    /// TTL applied when a write carries none
    pub default_ttl: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            default_ttl: Duration::from_secs(300),
        }
    }
}

/// Network key-value tier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: u8,

    /// Connect through the cluster client instead of a single node
    pub cluster_mode: bool,

    /// Prefix applied to every key written by the cache
    pub key_prefix: String,

    /// TTL applied when a write carries none
    pub default_ttl: Duration,

    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            username: None,
            password: None,
            database: 0,
            cluster_mode: false,
            key_prefix: "cache:".to_string(),
            default_ttl: Duration::from_secs(3600),
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(2),
        }
    }
}

impl RedisConfig {
    /// Connection URL including credentials
    pub fn url(&self) -> String {
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!("{}:{}@", user, pass),
            (None, Some(pass)) => format!(":{}@", pass),
            (Some(user), None) => format!("{}@", user),
            (None, None) => String::new(),
        };
        if self.cluster_mode {
            format!("redis://{}{}:{}", auth, self.host, self.port)
        } else {
            format!("redis://{}{}:{}/{}", auth, self.host, self.port, self.database)
        }
    }
}

/// Persistent table tier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub table_name: String,

    /// TTL applied when a write carries none
    pub default_ttl: Duration,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            table_name: "nutri-cache".to_string(),
            default_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// Edge/content tier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdnConfig {
    /// Base URL content is fetched from
    pub base_url: String,

    /// Cache-control header used when a write carries no TTL
    pub cache_control: String,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            cache_control: "public, max-age=3600".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            // 1 hour global default
            default_ttl: Duration::from_secs(3600),
            ttl_jitter: 0.0,
            memory: MemoryConfig::default(),
            redis: None,
            table: None,
            cdn: None,
            namespace: "nutri".to_string(),
            key_version: "v1".to_string(),
            enable_metrics: true,
            metrics_interval: Duration::from_secs(60),
            enable_cleanup: true,
            // Sweep every 5 minutes
            cleanup_interval: Duration::from_secs(300),
            background_refresh: true,
            write_behind_batch_size: 100,
            write_behind_interval: Duration::from_secs(5),
            profiles: ProfileTable::default(),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Load configuration from environment variables (and a `.env` file if present)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = CacheConfig::default();

        if let Some(size) = env_parse::<usize>("CACHE_MEMORY_MAX_SIZE")? {
            config.memory.max_size = size;
        }
        if let Some(secs) = env_parse::<u64>("CACHE_MEMORY_TTL")? {
            config.memory.default_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("CACHE_DEFAULT_TTL")? {
            config.default_ttl = Duration::from_secs(secs);
        }
        if let Some(jitter) = env_parse::<f64>("CACHE_TTL_JITTER")? {
            config.ttl_jitter = jitter;
        }

        if let Ok(host) = env::var("REDIS_HOST") {
            let mut redis = RedisConfig {
                host,
                username: env::var("REDIS_USERNAME").ok(),
                password: env::var("REDIS_PASSWORD").ok(),
                ..Default::default()
            };
            if let Some(port) = env_parse::<u16>("REDIS_PORT")? {
                redis.port = port;
            }
            if let Some(db) = env_parse::<u8>("REDIS_DB")? {
                redis.database = db;
            }
            if let Some(cluster) = env_parse::<bool>("REDIS_CLUSTER_MODE")? {
                redis.cluster_mode = cluster;
            }
            if let Ok(prefix) = env::var("REDIS_KEY_PREFIX") {
                redis.key_prefix = prefix;
            }
            if let Some(ms) = env_parse::<u64>("REDIS_CONNECT_TIMEOUT_MS")? {
                redis.connect_timeout = Duration::from_millis(ms);
            }
            if let Some(ms) = env_parse::<u64>("REDIS_RESPONSE_TIMEOUT_MS")? {
                redis.response_timeout = Duration::from_millis(ms);
            }
            config.redis = Some(redis);
        }

        if let Ok(table_name) = env::var("CACHE_TABLE_NAME") {
            config.table = Some(TableConfig {
                table_name,
                ..Default::default()
            });
        }

        if let Ok(base_url) = env::var("CDN_BASE_URL") {
            let mut cdn = CdnConfig {
                base_url,
                ..Default::default()
            };
            if let Ok(cache_control) = env::var("CDN_CACHE_CONTROL") {
                cdn.cache_control = cache_control;
            }
            config.cdn = Some(cdn);
        }

        if let Some(enabled) = env_parse::<bool>("CACHE_METRICS_ENABLED")? {
            config.enable_metrics = enabled;
        }
        if let Some(secs) = env_parse::<u64>("CACHE_METRICS_INTERVAL")? {
            config.metrics_interval = Duration::from_secs(secs);
        }
        if let Some(enabled) = env_parse::<bool>("CACHE_BACKGROUND_REFRESH")? {
            config.background_refresh = enabled;
        }
        if let Ok(namespace) = env::var("CACHE_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Ok(path) = env::var("CACHE_PROFILES_PATH") {
            config.profiles = ProfileTable::from_json_file(&path)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.memory.max_size == 0 {
            return Err(CacheError::Config(
                "memory.max_size must be greater than 0".to_string(),
            ));
        }

        if self.ttl_jitter < 0.0 || self.ttl_jitter > 1.0 {
            return Err(CacheError::Config(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.write_behind_batch_size == 0 {
            return Err(CacheError::Config(
                "write_behind_batch_size must be greater than 0".to_string(),
            ));
        }

        if self.namespace.is_empty() || self.namespace.contains(':') {
            return Err(CacheError::Config(
                "namespace must be non-empty and must not contain ':'".to_string(),
            ));
        }

        if let Some(cdn) = &self.cdn {
            if cdn.base_url.is_empty() {
                return Err(CacheError::Config("cdn.base_url must be set".to_string()));
            }
        }

        self.profiles.validate()
    }

    /// Apply the configured jitter to a TTL
    pub fn ttl_with_jitter(&self, ttl: Duration) -> Duration {
        if self.ttl_jitter == 0.0 {
            return ttl;
        }

        let base_secs = ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(1.0);

        Duration::from_secs_f64(final_secs)
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| CacheError::Config(format!("{} has an invalid value: {}", name, raw))),
        Err(_) => Ok(None),
    }
}

/// Builder for cache configuration with validation
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    default_ttl: Option<Duration>,
    ttl_jitter: Option<f64>,
    memory_max_size: Option<usize>,
    memory_ttl: Option<Duration>,
    redis: Option<RedisConfig>,
    table: Option<TableConfig>,
    cdn: Option<CdnConfig>,
    namespace: Option<String>,
    enable_metrics: Option<bool>,
    metrics_interval: Option<Duration>,
    enable_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
    background_refresh: Option<bool>,
    write_behind_batch_size: Option<usize>,
    write_behind_interval: Option<Duration>,
    profiles: Option<ProfileTable>,
}

impl CacheConfigBuilder {
    /// Set the global default TTL
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Set the memory tier capacity
    pub fn memory_max_size(mut self, max: usize) -> Self {
        self.memory_max_size = Some(max);
        self
    }

    /// Set the memory tier default TTL
    pub fn memory_ttl(mut self, ttl: Duration) -> Self {
        self.memory_ttl = Some(ttl);
        self
    }

    pub fn redis(mut self, redis: RedisConfig) -> Self {
        self.redis = Some(redis);
        self
    }

    pub fn table(mut self, table: TableConfig) -> Self {
        self.table = Some(table);
        self
    }

    pub fn cdn(mut self, cdn: CdnConfig) -> Self {
        self.cdn = Some(cdn);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Enable or disable the metrics reporter
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = Some(enable);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    /// Enable or disable the expired-entry sweeper
    pub fn enable_cleanup(mut self, enable: bool) -> Self {
        self.enable_cleanup = Some(enable);
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Enable or disable background refresh for refresh-ahead profiles
    pub fn background_refresh(mut self, enable: bool) -> Self {
        self.background_refresh = Some(enable);
        self
    }

    pub fn write_behind_batch_size(mut self, size: usize) -> Self {
        self.write_behind_batch_size = Some(size);
        self
    }

    pub fn write_behind_interval(mut self, interval: Duration) -> Self {
        self.write_behind_interval = Some(interval);
        self
    }

    /// Replace the profile table
    pub fn profiles(mut self, profiles: ProfileTable) -> Self {
        self.profiles = Some(profiles);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            memory: MemoryConfig {
                max_size: self.memory_max_size.unwrap_or(defaults.memory.max_size),
                default_ttl: self.memory_ttl.unwrap_or(defaults.memory.default_ttl),
            },
            redis: self.redis,
            table: self.table,
            cdn: self.cdn,
            namespace: self.namespace.unwrap_or(defaults.namespace),
            key_version: defaults.key_version,
            enable_metrics: self.enable_metrics.unwrap_or(defaults.enable_metrics),
            metrics_interval: self.metrics_interval.unwrap_or(defaults.metrics_interval),
            enable_cleanup: self.enable_cleanup.unwrap_or(defaults.enable_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            background_refresh: self
                .background_refresh
                .unwrap_or(defaults.background_refresh),
            write_behind_batch_size: self
                .write_behind_batch_size
                .unwrap_or(defaults.write_behind_batch_size),
            write_behind_interval: self
                .write_behind_interval
                .unwrap_or(defaults.write_behind_interval),
            profiles: self.profiles.unwrap_or(defaults.profiles),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.memory.max_size, 10_000);
        assert!(config.redis.is_none());
        assert!(config.enable_metrics);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut invalid_config = CacheConfig::default();
        invalid_config.memory.max_size = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = CacheConfig::default();
        invalid_config.ttl_jitter = 1.5;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = CacheConfig::default();
        invalid_config.namespace = "a:b".to_string();
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = CacheConfig::default();
        invalid_config.cdn = Some(CdnConfig::default());
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::builder()
            .default_ttl(Duration::from_secs(600))
            .memory_max_size(500)
            .namespace("coach")
            .enable_metrics(false)
            .build();

        assert_eq!(config.default_ttl, Duration::from_secs(600));
        assert_eq!(config.memory.max_size, 500);
        assert_eq!(config.namespace, "coach");
        assert!(!config.enable_metrics);
        assert_eq!(config.key_version, "v1");
    }

    #[test]
    fn test_ttl_with_jitter() {
        let config = CacheConfig {
            ttl_jitter: 0.1,
            ..Default::default()
        };

        let ttl = config.ttl_with_jitter(Duration::from_secs(3600));
        assert!(ttl.as_secs_f64() >= 3600.0 - 360.0);
        assert!(ttl.as_secs_f64() <= 3600.0 + 360.0);

        let exact = CacheConfig::default().ttl_with_jitter(Duration::from_millis(250));
        assert_eq!(exact, Duration::from_millis(250));
    }

    #[test]
    fn test_redis_url() {
        let mut redis = RedisConfig::default();
        assert_eq!(redis.url(), "redis://127.0.0.1:6379/0");

        redis.password = Some("secret".to_string());
        redis.database = 2;
        assert_eq!(redis.url(), "redis://:secret@127.0.0.1:6379/2");

        redis.cluster_mode = true;
        assert_eq!(redis.url(), "redis://:secret@127.0.0.1:6379");
    }
}

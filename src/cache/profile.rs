//! Named cache profiles
//!
//! A profile binds a tier, a strategy, a TTL and default tags to a use case so
//! call sites pick behavior by name. The table ships with defaults and can be
//! extended or overridden from a JSON file without touching code:
//!
//! ```json
//! {
//!   "meal_plan": { "tier": "hybrid", "strategy": "cache_aside", "ttl_seconds": 7200,
//!                  "tags": ["meal_plan"], "refresh_threshold": 0.8 }
//! }
//! ```

use crate::cache::types::{CacheStrategy, CacheTier};
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Profile used when a caller does not name one
///
/// Ships as HYBRID/CACHE_ASIDE so a default read sees values written under
/// any memory, redis or table profile.
pub const DEFAULT_PROFILE: &str = "default";

fn default_refresh_threshold() -> f64 {
    0.8
}

/// Tier, strategy, TTL and tags bundled under a name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheProfile {
    pub tier: CacheTier,
    pub strategy: CacheStrategy,
    pub ttl_seconds: u64,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Fraction of the TTL after which refresh-ahead reloads an entry
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold: f64,
}

impl CacheProfile {
    pub fn new(tier: CacheTier, strategy: CacheStrategy, ttl: Duration) -> Self {
        Self {
            tier,
            strategy,
            ttl_seconds: ttl.as_secs(),
            tags: Vec::new(),
            refresh_threshold: default_refresh_threshold(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_refresh_threshold(mut self, threshold: f64) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Read-only lookup table of profiles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileTable {
    profiles: HashMap<String, CacheProfile>,
}

impl Default for ProfileTable {
    fn default() -> Self {
        let shipped = [
            (
                DEFAULT_PROFILE,
                CacheProfile::new(
                    CacheTier::Hybrid,
                    CacheStrategy::CacheAside,
                    Duration::from_secs(3600),
                ),
            ),
            (
                "user_data",
                CacheProfile::new(
                    CacheTier::Redis,
                    CacheStrategy::WriteThrough,
                    Duration::from_secs(1800),
                )
                .with_tags(["user"]),
            ),
            (
                "meal_plan",
                CacheProfile::new(
                    CacheTier::Hybrid,
                    CacheStrategy::CacheAside,
                    Duration::from_secs(3600),
                )
                .with_tags(["meal_plan"]),
            ),
            (
                "api_response",
                CacheProfile::new(
                    CacheTier::Memory,
                    CacheStrategy::CacheAside,
                    Duration::from_secs(300),
                )
                .with_tags(["api"]),
            ),
            (
                "session_data",
                CacheProfile::new(
                    CacheTier::Redis,
                    CacheStrategy::WriteBehind,
                    Duration::from_secs(86_400),
                )
                .with_tags(["session"]),
            ),
            (
                "computed_results",
                CacheProfile::new(
                    CacheTier::Memory,
                    CacheStrategy::RefreshAhead,
                    Duration::from_secs(7200),
                )
                .with_tags(["computed"])
                .with_refresh_threshold(0.75),
            ),
            (
                "static_content",
                CacheProfile::new(
                    CacheTier::Cdn,
                    CacheStrategy::CacheAside,
                    Duration::from_secs(86_400),
                )
                .with_tags(["static"]),
            ),
        ];

        Self {
            profiles: shipped
                .into_iter()
                .map(|(name, profile)| (name.to_string(), profile))
                .collect(),
        }
    }
}

impl ProfileTable {
    /// Empty table; every lookup resolves to the built-in fallback
    pub fn empty() -> Self {
        Self {
            profiles: HashMap::new(),
        }
    }

    /// Shipped profiles overlaid with those from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Config(format!("cannot read profiles from {}: {}", path.display(), e))
        })?;
        let overrides: HashMap<String, CacheProfile> = serde_json::from_str(&raw)
            .map_err(|e| CacheError::Config(format!("invalid profile file: {}", e)))?;

        let mut table = Self::default();
        table.profiles.extend(overrides);
        table.validate()?;
        Ok(table)
    }

    /// Add or replace a profile
    pub fn insert(&mut self, name: impl Into<String>, profile: CacheProfile) {
        self.profiles.insert(name.into(), profile);
    }

    pub fn get(&self, name: &str) -> Option<&CacheProfile> {
        self.profiles.get(name)
    }

    /// Look up a profile; unknown names get MEMORY/CACHE_ASIDE with `default_ttl`
    pub fn resolve(&self, name: &str, default_ttl: Duration) -> CacheProfile {
        match self.profiles.get(name) {
            Some(profile) => profile.clone(),
            None => {
                debug!(profile = name, "Unknown cache profile, using memory cache-aside");
                CacheProfile::new(CacheTier::Memory, CacheStrategy::CacheAside, default_ttl)
            }
        }
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Validate every profile
    pub fn validate(&self) -> Result<()> {
        for (name, profile) in &self.profiles {
            if !(0.0..=1.0).contains(&profile.refresh_threshold) {
                return Err(CacheError::Config(format!(
                    "profile {} has refresh_threshold outside 0.0..=1.0",
                    name
                )));
            }
            if profile.ttl_seconds == 0 {
                return Err(CacheError::Config(format!(
                    "profile {} must have a positive ttl_seconds",
                    name
                )));
            }
        }
        Ok(())
    }
}

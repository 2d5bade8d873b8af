//! Core type definitions for the cache system

use crate::error::{CacheError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage tier a cached value lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// In-process LRU store
    Memory,

    /// Network key-value store
    Redis,

    /// Persistent table store
    Database,

    /// Edge/content delivery store
    Cdn,

    /// Virtual tier: memory, then redis, then database
    Hybrid,
}

impl CacheTier {
    /// Probe order of the hybrid tier, fastest first
    pub const HYBRID_ORDER: [CacheTier; 3] =
        [CacheTier::Memory, CacheTier::Redis, CacheTier::Database];

    /// Every tier backed by a real backend
    pub const CONCRETE: [CacheTier; 4] = [
        CacheTier::Memory,
        CacheTier::Redis,
        CacheTier::Database,
        CacheTier::Cdn,
    ];

    /// Whether this tier maps to exactly one backend
    pub fn is_concrete(&self) -> bool {
        !matches!(self, CacheTier::Hybrid)
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Memory => write!(f, "memory"),
            CacheTier::Redis => write!(f, "redis"),
            CacheTier::Database => write!(f, "database"),
            CacheTier::Cdn => write!(f, "cdn"),
            CacheTier::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Read/write algorithm bound to a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    CacheAside,
    WriteThrough,
    WriteBehind,
    RefreshAhead,
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStrategy::CacheAside => write!(f, "cache_aside"),
            CacheStrategy::WriteThrough => write!(f, "write_through"),
            CacheStrategy::WriteBehind => write!(f, "write_behind"),
            CacheStrategy::RefreshAhead => write!(f, "refresh_ahead"),
        }
    }
}

/// Opaque cached payload
///
/// Structured data travels as JSON so it stays readable inside remote stores;
/// anything else is carried as raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Json(serde_json::Value),
    Binary(Vec<u8>),
}

impl CacheValue {
    /// Serialize any serde value into its JSON form
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(CacheValue::Json(serde_json::to_value(value)?))
    }

    /// Deserialize the payload into a concrete type
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            CacheValue::Json(value) => Ok(T::deserialize(value)?),
            CacheValue::Binary(bytes) => serde_json::from_slice(bytes).map_err(|e| {
                CacheError::Serialization(format!("binary payload is not decodable: {}", e))
            }),
        }
    }

    /// Borrow the JSON form, if any
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            CacheValue::Json(value) => Some(value),
            CacheValue::Binary(_) => None,
        }
    }

    /// Approximate payload size in bytes
    pub fn size_bytes(&self) -> usize {
        match self {
            CacheValue::Json(value) => value.to_string().len(),
            CacheValue::Binary(bytes) => bytes.len(),
        }
    }
}

impl From<serde_json::Value> for CacheValue {
    fn from(value: serde_json::Value) -> Self {
        CacheValue::Json(value)
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(bytes: Vec<u8>) -> Self {
        CacheValue::Binary(bytes)
    }
}

impl From<String> for CacheValue {
    fn from(s: String) -> Self {
        CacheValue::Json(serde_json::Value::String(s))
    }
}

impl From<&str> for CacheValue {
    fn from(s: &str) -> Self {
        CacheValue::Json(serde_json::Value::String(s.to_string()))
    }
}

/// Outcome of a cache read
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Served from the cache tier itself
    Hit(CacheValue),

    /// Produced by a slower store or the loader
    Loaded(CacheValue),

    /// Nothing found and nothing loaded
    Miss,
}

impl Lookup {
    /// Split into `(value, was_hit)`
    pub fn into_parts(self) -> (Option<CacheValue>, bool) {
        match self {
            Lookup::Hit(value) => (Some(value), true),
            Lookup::Loaded(value) => (Some(value), false),
            Lookup::Miss => (None, false),
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tier_display_and_serde() {
        assert_eq!(CacheTier::Memory.to_string(), "memory");
        assert_eq!(CacheTier::Hybrid.to_string(), "hybrid");
        assert_eq!(serde_json::to_string(&CacheTier::Cdn).unwrap(), "\"cdn\"");
        let tier: CacheTier = serde_json::from_str("\"database\"").unwrap();
        assert_eq!(tier, CacheTier::Database);
        assert!(!CacheTier::Hybrid.is_concrete());
    }

    #[test]
    fn test_strategy_serde() {
        assert_eq!(
            serde_json::to_string(&CacheStrategy::WriteBehind).unwrap(),
            "\"write_behind\""
        );
        assert_eq!(CacheStrategy::RefreshAhead.to_string(), "refresh_ahead");
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Meal {
        name: String,
        calories: u32,
    }

    #[test]
    fn test_value_typed_access() {
        let meal = Meal {
            name: "oats".to_string(),
            calories: 350,
        };
        let value = CacheValue::from_serializable(&meal).unwrap();
        assert_eq!(value.as_json(), Some(&json!({"name": "oats", "calories": 350})));
        assert_eq!(value.deserialize::<Meal>().unwrap(), meal);

        let wrong = CacheValue::Binary(vec![0x80, 0x01]);
        assert!(wrong.deserialize::<Meal>().is_err());
    }

    #[test]
    fn test_lookup_parts() {
        assert_eq!(Lookup::Hit("a".into()).into_parts(), (Some("a".into()), true));
        assert_eq!(Lookup::Loaded("b".into()).into_parts(), (Some("b".into()), false));
        assert_eq!(Lookup::Miss.into_parts(), (None, false));
    }
}

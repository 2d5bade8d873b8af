//! Cache entry management with TTL support

use crate::cache::types::{CacheTier, CacheValue};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// A cache entry with TTL and access bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cache key
    pub key: String,

    /// The cached value
    pub value: CacheValue,

    /// Tier holding the entry
    pub tier: CacheTier,

    /// When the entry was written
    pub created_at: DateTime<Utc>,

    /// When the entry expires
    pub expires_at: DateTime<Utc>,

    /// Last access time
    pub accessed_at: DateTime<Utc>,

    /// Number of reads served from this entry
    pub hit_count: u64,
}

impl CacheEntry {
    /// Create a new entry expiring `ttl` from now
    pub fn new(key: String, value: CacheValue, tier: CacheTier, ttl: Duration) -> Self {
        let now = Utc::now();
        let expires_at =
            now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(3600));

        Self {
            key,
            value,
            tier,
            created_at: now,
            expires_at,
            accessed_at: now,
            hit_count: 0,
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Time left before expiry, `None` once expired
    pub fn remaining_ttl(&self) -> Option<Duration> {
        let now = Utc::now();
        if now > self.expires_at {
            None
        } else {
            (self.expires_at - now).to_std().ok()
        }
    }

    /// Fraction of the original lifetime already elapsed (0.0 - 1.0)
    pub fn elapsed_fraction(&self) -> f64 {
        let lifetime = (self.expires_at - self.created_at).num_milliseconds();
        if lifetime <= 0 {
            return 1.0;
        }
        let elapsed = (Utc::now() - self.created_at).num_milliseconds();
        (elapsed as f64 / lifetime as f64).clamp(0.0, 1.0)
    }

    /// Mark the entry as accessed (updates access time and count)
    pub fn mark_accessed(&mut self) {
        self.accessed_at = Utc::now();
        self.hit_count += 1;
    }

    /// Approximate size: key + value
    pub fn size_bytes(&self) -> usize {
        self.key.len() + self.value.size_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn entry(ttl: Duration) -> CacheEntry {
        CacheEntry::new("test".to_string(), "value".into(), CacheTier::Memory, ttl)
    }

    #[test]
    fn test_cache_entry_creation() {
        let entry = entry(Duration::from_secs(3600));

        assert_eq!(entry.key, "test");
        assert_eq!(entry.value, CacheValue::from("value"));
        assert!(!entry.is_expired());
        assert!(entry.expires_at >= entry.created_at);
        assert_eq!(entry.hit_count, 0);
    }

    #[test]
    fn test_entry_expiration() {
        let entry = entry(Duration::from_millis(100));

        assert!(!entry.is_expired());
        sleep(Duration::from_millis(150));
        assert!(entry.is_expired());
        assert!(entry.remaining_ttl().is_none());
        assert_eq!(entry.elapsed_fraction(), 1.0);
    }

    #[test]
    fn test_mark_accessed() {
        let mut entry = entry(Duration::from_secs(3600));
        let initial_time = entry.accessed_at;

        sleep(Duration::from_millis(10));
        entry.mark_accessed();

        assert_eq!(entry.hit_count, 1);
        assert!(entry.accessed_at > initial_time);
    }

    #[test]
    fn test_remaining_ttl_and_fraction() {
        let entry = entry(Duration::from_secs(3600));

        let left = entry.remaining_ttl().unwrap();
        assert!(left <= Duration::from_secs(3600));
        assert!(entry.elapsed_fraction() < 0.01);
    }

    #[test]
    fn test_size_bytes() {
        let entry = entry(Duration::from_secs(60));
        assert!(entry.size_bytes() >= "test".len() + "value".len());
    }
}

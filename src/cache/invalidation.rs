//! Tag-based invalidation bookkeeping
//!
//! The handler keeps an in-memory `tag -> keys` index filled on every tagged
//! write. Deletion itself is driven by the manager, which owns the backends;
//! the index is not persisted and starts empty after a restart.

use crate::cache::pattern::glob_match;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

/// Why keys are being dropped, used to label log lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationReason {
    /// Explicit delete by key
    Manual,

    /// Invalidated by tag match
    TagMatch { tag: String },

    /// Invalidated by glob pattern
    Pattern { pattern: String },

    /// Whole tier or cache cleared
    Cleared,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::TagMatch { tag } => write!(f, "tag match: {}", tag),
            InvalidationReason::Pattern { pattern } => write!(f, "pattern match: {}", pattern),
            InvalidationReason::Cleared => write!(f, "cache cleared"),
        }
    }
}

/// Tag to key index
#[derive(Debug, Default)]
pub struct InvalidationHandler {
    tag_mappings: RwLock<HashMap<String, HashSet<String>>>,
}

impl InvalidationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key` was written under each of `tags`
    pub async fn register_tag(&self, key: &str, tags: &[String]) {
        if tags.is_empty() {
            return;
        }
        let mut mappings = self.tag_mappings.write().await;
        for tag in tags {
            mappings
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Remove a tag's entry and return the keys it held
    ///
    /// A key written again later under the same tag registers fresh.
    pub async fn take_tag(&self, tag: &str) -> Vec<String> {
        let mut mappings = self.tag_mappings.write().await;
        let mut keys: Vec<String> = mappings
            .remove(tag)
            .map(|keys| keys.into_iter().collect())
            .unwrap_or_default();
        keys.sort_unstable();
        keys
    }

    /// Keys currently registered under a tag
    pub async fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        let mappings = self.tag_mappings.read().await;
        let mut keys: Vec<String> = mappings
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort_unstable();
        keys
    }

    /// Drop a key from every tag set
    pub async fn unregister_key(&self, key: &str) {
        let mut mappings = self.tag_mappings.write().await;
        mappings.retain(|_, keys| {
            keys.remove(key);
            !keys.is_empty()
        });
    }

    /// Drop every key matching a glob from every tag set; returns how many references went
    pub async fn forget_matching(&self, pattern: &str) -> usize {
        let mut mappings = self.tag_mappings.write().await;
        let mut removed = 0;
        mappings.retain(|_, keys| {
            let before = keys.len();
            keys.retain(|key| !glob_match(pattern, key));
            removed += before - keys.len();
            !keys.is_empty()
        });
        if removed > 0 {
            debug!("Dropped {} tag references matching {}", removed, pattern);
        }
        removed
    }

    /// Number of tags currently tracked
    pub async fn tag_count(&self) -> usize {
        self.tag_mappings.read().await.len()
    }

    pub async fn clear(&self) {
        self.tag_mappings.write().await.clear();
    }
}

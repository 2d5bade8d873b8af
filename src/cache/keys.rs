//! Deterministic cache key construction
//!
//! Keys follow `namespace:version:entity:operation[:user:<id>][:params:<hash>][:tags:<tags>]`.
//! Parameters are hashed from key-sorted JSON, so two parameter maps with the
//! same contents always produce the same key, and the key length stays bounded
//! however large the parameters are.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the parameter digest
const PARAMS_HASH_LEN: usize = 16;

/// Hash parameters into a short stable digest
///
/// `serde_json::Value` objects are ordered maps, so serialization is key-sorted
/// regardless of how the caller assembled them.
pub fn hash_params(params: &Value) -> String {
    let canonical = params.to_string();
    let hex = format!("{:x}", Sha256::digest(canonical.as_bytes()));
    hex[..PARAMS_HASH_LEN].to_string()
}

/// Key builder shared by every cache consumer
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    namespace: String,
    version: String,
}

impl Default for CacheKeyBuilder {
    fn default() -> Self {
        Self::new("nutri", "v1")
    }
}

impl CacheKeyBuilder {
    pub fn new(namespace: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            version: version.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Build a key from its components
    pub fn build_key(
        &self,
        entity: &str,
        operation: &str,
        params: Option<&Value>,
        tags: Option<&[String]>,
        user_id: Option<&str>,
    ) -> String {
        let mut key = format!(
            "{}:{}:{}:{}",
            self.namespace, self.version, entity, operation
        );

        if let Some(user_id) = user_id {
            key.push_str(&format!(":user:{}", user_id));
        }

        if let Some(params) = params {
            if !is_empty_params(params) {
                key.push_str(&format!(":params:{}", hash_params(params)));
            }
        }

        if let Some(tags) = tags {
            if !tags.is_empty() {
                let mut sorted: Vec<&str> = tags.iter().map(String::as_str).collect();
                sorted.sort_unstable();
                sorted.dedup();
                key.push_str(&format!(":tags:{}", sorted.join(",")));
            }
        }

        key
    }

    /// Key for a piece of per-user data
    pub fn build_user_key(&self, user_id: &str, data_type: &str) -> String {
        self.build_key("user", data_type, None, None, Some(user_id))
    }

    /// Key for a user's meal plan, optionally for a specific day
    pub fn build_meal_plan_key(&self, user_id: &str, plan_date: Option<&str>) -> String {
        let params = plan_date.map(|date| json!({ "date": date }));
        self.build_key("meal_plan", "get", params.as_ref(), None, Some(user_id))
    }

    /// Key for conversation session state
    pub fn build_session_key(&self, session_id: &str) -> String {
        self.build_key("session", session_id, None, None, None)
    }

    /// Key for an upstream API response
    pub fn build_api_key(&self, endpoint: &str, params: Option<&Value>) -> String {
        let endpoint = endpoint.trim_matches('/').replace('/', "_");
        self.build_key("api", &endpoint, params, None, None)
    }

    /// Key for the output of an expensive computation
    pub fn build_computed_key(&self, computation: &str, inputs: &Value) -> String {
        self.build_key("computed", computation, Some(inputs), None, None)
    }

    /// Key for search results, optionally scoped to a user
    pub fn build_search_key(
        &self,
        query: &str,
        filters: Option<&Value>,
        user_id: Option<&str>,
    ) -> String {
        let params = json!({
            "query": query.trim().to_lowercase(),
            "filters": filters.cloned().unwrap_or(Value::Null),
        });
        self.build_key("search", "query", Some(&params), None, user_id)
    }

    /// Glob matching every key scoped to a user
    ///
    /// Ids sharing a prefix (`4` and `42`) both match; over-invalidating is harmless.
    pub fn build_user_pattern(&self, user_id: &str) -> String {
        format!("{}:{}:*:user:{}*", self.namespace, self.version, user_id)
    }

    /// Glob matching every key of an entity
    pub fn build_entity_pattern(&self, entity: &str) -> String {
        format!("{}:{}:{}:*", self.namespace, self.version, entity)
    }

    /// Glob matching keys built with a tag
    pub fn build_tag_pattern(&self, tag: &str) -> String {
        format!("{}:{}:*:tags:*{}*", self.namespace, self.version, tag)
    }

    /// Recover the user id from a key built with one
    pub fn extract_user_id(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split(':').collect();
        if parts.len() >= 6 && parts[4] == "user" {
            Some(parts[5].to_string())
        } else {
            None
        }
    }

    /// Recover the entity segment of a built key
    pub fn extract_entity(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split(':').collect();
        if parts.len() >= 4 && parts[0] == self.namespace && parts[1] == self.version {
            Some(parts[2].to_string())
        } else {
            None
        }
    }
}

fn is_empty_params(params: &Value) -> bool {
    match params {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

//! Application-facing caches
//!
//! Thin facades over a shared [`CacheManager`] that fix the profile, key
//! shape and tags for one kind of data:
//! - Per-user data (`user_data` profile)
//! - Meal plans (`meal_plan` profile)
//! - Conversation sessions (`session_data` profile)
//! - Upstream API responses (`api_response` profile)
//!
//! ```
//! use nutri_cache::cache::{
//!     CacheClients, CacheConfig, CacheManager, RedisConfig, TableConfig, UserDataCache,
//! };
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = CacheConfig::builder()
//!     .redis(RedisConfig::default())
//!     .table(TableConfig::default())
//!     .build();
//! let manager = Arc::new(CacheManager::new(config, CacheClients::local()).unwrap());
//! let users = UserDataCache::new(manager);
//!
//! users.set("42", "goals", &serde_json::json!({"kcal": 2000}), None).await;
//! assert_eq!(users.invalidate_user("42").await, 1);
//! # });
//! ```

use crate::cache::manager::CacheManager;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const USER_PROFILE: &str = "user_data";
const MEAL_PLAN_PROFILE: &str = "meal_plan";
const SESSION_PROFILE: &str = "session_data";
const API_PROFILE: &str = "api_response";

/// Tag carried by every entry scoped to a user
pub fn user_tag(user_id: &str) -> String {
    format!("user:{}", user_id)
}

/// Per-user data such as profiles, preferences and goals
#[derive(Clone)]
pub struct UserDataCache {
    manager: Arc<CacheManager>,
}

impl UserDataCache {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }

    pub fn key(&self, user_id: &str, data_type: &str) -> String {
        self.manager.keys().build_user_key(user_id, data_type)
    }

    pub async fn get<T: DeserializeOwned>(&self, user_id: &str, data_type: &str) -> Option<T> {
        let key = self.key(user_id, data_type);
        self.manager.get_as(&key, USER_PROFILE, None).await.0
    }

    pub async fn set<T: Serialize>(
        &self,
        user_id: &str,
        data_type: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        let key = self.key(user_id, data_type);
        let tags = vec!["user".to_string(), user_tag(user_id)];
        self.manager
            .set_as(&key, value, ttl, USER_PROFILE, Some(&tags))
            .await
    }

    /// Drop everything tagged for the user; returns how many keys went
    pub async fn invalidate_user(&self, user_id: &str) -> usize {
        self.manager.invalidate_by_tag(&user_tag(user_id)).await
    }
}

/// Generated meal plans, optionally per day
#[derive(Clone)]
pub struct MealPlanCache {
    manager: Arc<CacheManager>,
}

impl MealPlanCache {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }

    fn plans_tag(user_id: &str) -> String {
        format!("meal_plan:{}", user_id)
    }

    pub fn key(&self, user_id: &str, plan_date: Option<&str>) -> String {
        self.manager.keys().build_meal_plan_key(user_id, plan_date)
    }

    pub async fn get<T: DeserializeOwned>(&self, user_id: &str, plan_date: Option<&str>) -> Option<T> {
        let key = self.key(user_id, plan_date);
        self.manager.get_as(&key, MEAL_PLAN_PROFILE, None).await.0
    }

    pub async fn set<T: Serialize>(&self, user_id: &str, plan_date: Option<&str>, plan: &T) -> bool {
        let key = self.key(user_id, plan_date);
        let tags = vec![
            "meal_plan".to_string(),
            user_tag(user_id),
            Self::plans_tag(user_id),
        ];
        self.manager
            .set_as(&key, plan, None, MEAL_PLAN_PROFILE, Some(&tags))
            .await
    }

    /// Drop every cached plan of a user, leaving their other data
    pub async fn invalidate_user_plans(&self, user_id: &str) -> usize {
        self.manager
            .invalidate_by_tag(&Self::plans_tag(user_id))
            .await
    }
}

/// Conversation session state
#[derive(Clone)]
pub struct SessionCache {
    manager: Arc<CacheManager>,
}

impl SessionCache {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }

    pub fn key(&self, session_id: &str) -> String {
        self.manager.keys().build_session_key(session_id)
    }

    pub async fn get<T: DeserializeOwned>(&self, session_id: &str) -> Option<T> {
        self.manager
            .get_as(&self.key(session_id), SESSION_PROFILE, None)
            .await
            .0
    }

    pub async fn set<T: Serialize>(&self, session_id: &str, state: &T, ttl: Option<Duration>) -> bool {
        self.manager
            .set_as(&self.key(session_id), state, ttl, SESSION_PROFILE, None)
            .await
    }

    pub async fn end(&self, session_id: &str) -> bool {
        self.manager.delete(&self.key(session_id)).await
    }
}

/// Responses from upstream APIs, keyed by endpoint and parameters
#[derive(Clone)]
pub struct ApiResponseCache {
    manager: Arc<CacheManager>,
}

impl ApiResponseCache {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }

    pub fn key(&self, endpoint: &str, params: Option<&Value>) -> String {
        self.manager.keys().build_api_key(endpoint, params)
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str, params: Option<&Value>) -> Option<T> {
        self.manager
            .get_as(&self.key(endpoint, params), API_PROFILE, None)
            .await
            .0
    }

    pub async fn set<T: Serialize>(
        &self,
        endpoint: &str,
        params: Option<&Value>,
        response: &T,
        ttl: Option<Duration>,
    ) -> bool {
        self.manager
            .set_as(&self.key(endpoint, params), response, ttl, API_PROFILE, None)
            .await
    }

    /// Drop cached responses for an endpoint, whatever their parameters
    pub async fn invalidate_endpoint(&self, endpoint: &str) -> usize {
        let pattern = format!("{}*", self.key(endpoint, None));
        self.manager.invalidate_by_pattern(&pattern).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::{CacheConfig, RedisConfig, TableConfig};
    use crate::cache::manager::CacheClients;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Goals {
        daily_kcal: u32,
        protein_g: u32,
    }

    fn manager() -> Arc<CacheManager> {
        let config = CacheConfig::builder()
            .redis(RedisConfig::default())
            .table(TableConfig::default())
            .build();
        Arc::new(CacheManager::new(config, CacheClients::local()).unwrap())
    }

    #[tokio::test]
    async fn test_user_data_round_trip_and_invalidation() {
        let users = UserDataCache::new(manager());
        let goals = Goals {
            daily_kcal: 2000,
            protein_g: 120,
        };

        assert!(users.set("42", "goals", &goals, None).await);
        assert!(users.set("42", "prefs", &json!({"vegan": true}), None).await);
        assert_eq!(users.get::<Goals>("42", "goals").await, Some(goals));

        assert_eq!(users.invalidate_user("42").await, 2);
        assert!(users.get::<Goals>("42", "goals").await.is_none());
    }

    #[tokio::test]
    async fn test_meal_plans_invalidated_separately() {
        let manager = manager();
        let plans = MealPlanCache::new(manager.clone());
        let users = UserDataCache::new(manager);

        plans.set("7", Some("2024-05-01"), &json!(["oats"])).await;
        plans.set("7", Some("2024-05-02"), &json!(["soup"])).await;
        users.set("7", "goals", &json!({"kcal": 1800}), None).await;

        assert_eq!(
            plans.get::<Vec<String>>("7", Some("2024-05-01")).await,
            Some(vec!["oats".to_string()])
        );

        assert_eq!(plans.invalidate_user_plans("7").await, 2);
        assert!(plans.get::<Vec<String>>("7", Some("2024-05-02")).await.is_none());
        assert!(users.get::<Value>("7", "goals").await.is_some());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let manager = manager();
        let sessions = SessionCache::new(manager.clone());

        assert!(sessions.set("s-1", &json!({"step": 2}), None).await);
        assert_eq!(sessions.get::<Value>("s-1").await, Some(json!({"step": 2})));
        assert_eq!(manager.pending_writes().await, 1);

        assert!(sessions.end("s-1").await);
        assert!(sessions.get::<Value>("s-1").await.is_none());
        assert_eq!(manager.pending_writes().await, 0);
    }

    #[tokio::test]
    async fn test_api_responses_by_endpoint() {
        let api = ApiResponseCache::new(manager());
        let params = json!({"q": "apple"});

        api.set("/foods/search", Some(&params), &json!({"hits": 3}), None)
            .await;
        api.set("/foods/search", None, &json!({"hits": 0}), None).await;
        api.set("/recipes", None, &json!([]), None).await;

        assert_eq!(
            api.get::<Value>("/foods/search", Some(&params)).await,
            Some(json!({"hits": 3}))
        );

        assert_eq!(api.invalidate_endpoint("/foods/search").await, 2);
        assert!(api.get::<Value>("/foods/search", Some(&params)).await.is_none());
        assert!(api.get::<Value>("/recipes", None).await.is_some());
    }
}

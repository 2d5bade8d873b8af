//! Cache Manager Demo Application
//!
//! Walks through profiles, tiers and invalidation using the in-process
//! stand-ins for redis, the table store and the CDN origin.
//!
//! Usage:
//!   cargo run --example manager_demo

use nutri_cache::cache::{
    MealPlanCache, RedisConfig, SessionCache, TableConfig, UserDataCache,
};
use nutri_cache::{CacheClients, CacheConfig, CacheManager, CacheTier, Loader};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("=== Cache Manager Demo ===");

    let config = CacheConfig::builder()
        .redis(RedisConfig::default())
        .table(TableConfig::default())
        .write_behind_interval(Duration::from_millis(200))
        .build();
    let manager = Arc::new(CacheManager::new(config, CacheClients::local())?);
    manager.start_background_tasks().await;

    info!("\n--- User data (redis, write-through) ---");
    let users = UserDataCache::new(manager.clone());
    users
        .set("42", "goals", &json!({"daily_kcal": 2000, "protein_g": 120}), None)
        .await;
    let goals: Option<serde_json::Value> = users.get("42", "goals").await;
    info!("Goals for user 42: {:?}", goals);
    info!(
        "Persisted to table store: {}",
        manager
            .exists(&users.key("42", "goals"), Some(CacheTier::Database))
            .await
    );

    info!("\n--- Meal plans (hybrid) ---");
    let plans = MealPlanCache::new(manager.clone());
    let key = plans.key("42", Some("2024-05-01"));
    let loader = Loader::typed(|| async {
        info!("  generating meal plan...");
        Ok(Some(vec!["overnight oats", "lentil soup", "salmon bowl"]))
    });
    for attempt in 1..=2 {
        let (plan, hit) = manager.get(&key, "meal_plan", Some(&loader)).await;
        info!("Attempt {}: hit={} plan={:?}", attempt, hit, plan);
    }

    info!("\n--- Sessions (redis, write-behind) ---");
    let sessions = SessionCache::new(manager.clone());
    sessions.set("s-1", &json!({"step": "onboarding"}), None).await;
    info!("Pending writes: {}", manager.pending_writes().await);
    tokio::time::sleep(Duration::from_millis(500)).await;
    info!("Pending writes after flush: {}", manager.pending_writes().await);

    info!("\n--- Invalidation ---");
    let removed = users.invalidate_user("42").await;
    info!("Invalidated {} entries tagged for user 42", removed);
    let removed = manager.invalidate_user_cache("42").await;
    info!("Pattern sweep removed {} more", removed);

    info!("\n--- Status ---");
    let status = manager.get_status().await;
    info!("{}", serde_json::to_string_pretty(&status)?);
    info!("{}", status.metrics);

    manager.shutdown().await;
    info!("\n=== Demo Complete ===");
    Ok(())
}

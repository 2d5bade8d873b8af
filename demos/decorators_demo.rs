//! Call-Site Caching Demo
//!
//! Shows `cached`, `conditional_cache`, `invalidate_cache` and `memoize`
//! wrapping ordinary functions.
//!
//! Usage:
//!   cargo run --example decorators_demo

use nutri_cache::cache::{cached, conditional_cache, invalidate_cache, memoize};
use nutri_cache::{CacheClients, CacheConfig, CacheManager};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

/// Mifflin-St Jeor basal metabolic rate
fn bmr(weight_kg: f64, height_cm: f64, age: u32) -> f64 {
    10.0 * weight_kg + 6.25 * height_cm - 5.0 * age as f64 + 5.0
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("=== Call-Site Caching Demo ===");

    let manager = Arc::new(CacheManager::new(
        CacheConfig::default(),
        CacheClients::local(),
    )?);

    info!("\n--- cached ---");
    let cached_bmr = cached(manager.clone(), "bmr")
        .profile("computed_results")
        .ttl(Duration::from_secs(3600));
    for _ in 0..2 {
        let args = (70.0, 175.0, 30);
        let value = cached_bmr
            .call_sync(&args, || {
                info!("  computing BMR...");
                Ok::<_, Infallible>(bmr(args.0, args.1, args.2))
            })
            .await?;
        info!("BMR: {:.0} kcal", value);
    }

    info!("\n--- conditional_cache ---");
    let search = conditional_cache(manager.clone(), "food_search", |hits: &Vec<String>| {
        !hits.is_empty()
    });
    for query in ["kale", "kale", "unobtainium", "unobtainium"] {
        let hits = search
            .call_sync(&query, || {
                info!("  searching for {}...", query);
                let hits = if query == "kale" {
                    vec!["kale chips".to_string(), "kale salad".to_string()]
                } else {
                    Vec::new()
                };
                Ok::<_, Infallible>(hits)
            })
            .await?;
        info!("{}: {} results", query, hits.len());
    }

    info!("\n--- invalidate_cache ---");
    let profile = cached(manager.clone(), "profile")
        .key_template("profile:{user_id}")
        .tags(["profiles"]);
    let args = json!({"user_id": "42"});
    profile
        .call_sync(&args, || Ok::<_, Infallible>(json!({"name": "Ann"})))
        .await?;
    info!("Cached profile present: {}", manager.exists("profile:42", None).await);

    invalidate_cache(manager.clone())
        .tags(["profiles"])
        .call(&args, || async { Ok::<_, Infallible>(()) })
        .await?;
    info!("After update: {}", manager.exists("profile:42", None).await);

    info!("\n--- memoize ---");
    let memo = memoize(128);
    for n in [30u64, 30, 31] {
        let value = memo
            .call_sync(&n, || Ok::<_, Infallible>((1..=n).sum::<u64>()))
            .await?;
        info!("sum(1..={}) = {}", n, value);
    }
    info!("Memoized results: {}", memo.len().await);

    info!("\n{}", manager.get_metrics().await);
    info!("\n=== Demo Complete ===");
    Ok(())
}

//! Integration tests for the cache manager
//!
//! Runs against the in-process stand-ins for redis, the table store and the
//! CDN origin, so no external services are needed.
//!
//! Covers:
//! - Tagged writes and tag invalidation
//! - Memoized operations through `cached`
//! - Cache warming with failing loaders
//! - TTL expiry, LRU eviction and key determinism
//! - Write-through and write-behind persistence
//! - Hybrid promotion
//! - Degradation when a remote tier goes offline

use nutri_cache::cache::backend::{LocalKeyValueStore, LocalObjectStore, LocalTableStore};
use nutri_cache::cache::{cached, CdnConfig, RedisConfig, TableConfig};
use nutri_cache::{
    CacheBackend, CacheClients, CacheConfig, CacheKeyBuilder, CacheManager, CacheProfile,
    CacheStrategy, CacheTier, CacheValue, Loader, ProfileTable,
};
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn full_config() -> CacheConfig {
    CacheConfig::builder()
        .redis(RedisConfig::default())
        .table(TableConfig::default())
        .build()
}

fn full_manager() -> Arc<CacheManager> {
    Arc::new(CacheManager::new(full_config(), CacheClients::local()).unwrap())
}

/// Manager whose remote stores stay reachable from the test
fn manager_with_handles() -> (Arc<CacheManager>, Arc<LocalKeyValueStore>, Arc<LocalTableStore>) {
    let key_value = Arc::new(LocalKeyValueStore::new());
    let table = Arc::new(LocalTableStore::new());
    let clients = CacheClients::none()
        .with_key_value(key_value.clone())
        .with_table(table.clone());
    let manager = Arc::new(CacheManager::new(full_config(), clients).unwrap());
    (manager, key_value, table)
}

fn tags(values: &[&str]) -> Vec<String> {
    values.iter().map(|t| t.to_string()).collect()
}

#[tokio::test]
async fn test_tagged_write_then_invalidate() {
    let manager = full_manager();
    let user_tags = tags(&["user", "user:1"]);

    assert!(
        manager
            .set_as(
                "u:1",
                &json!({"name": "Ann"}),
                Some(Duration::from_secs(60)),
                "user_data",
                Some(&user_tags),
            )
            .await
    );

    // Read back through the default profile
    let (value, hit) = manager.get("u:1", "default", None).await;
    assert_eq!(value, Some(CacheValue::Json(json!({"name": "Ann"}))));
    assert!(hit);

    assert_eq!(manager.invalidate_by_tag("user:1").await, 1);

    let (value, hit) = manager.get("u:1", "default", None).await;
    assert!(value.is_none());
    assert!(!hit);
    assert_eq!(manager.get("u:1", "user_data", None).await, (None, false));
}

#[tokio::test]
async fn test_tag_invalidation_leaves_other_keys() {
    let manager = full_manager();

    for id in ["a", "b", "c"] {
        manager
            .set(id, &"tagged".into(), None, "default", Some(&tags(&["plans"])))
            .await;
    }
    manager
        .set("d", &"untagged".into(), None, "default", Some(&tags(&["other"])))
        .await;

    assert_eq!(manager.invalidate_by_tag("plans").await, 3);
    for id in ["a", "b", "c"] {
        assert!(!manager.exists(id, None).await, "{} should be gone", id);
    }
    assert!(manager.exists("d", None).await);

    // The tag entry is consumed
    assert_eq!(manager.invalidate_by_tag("plans").await, 0);
}

#[tokio::test]
async fn test_cached_operation_runs_once_per_input() {
    let manager = full_manager();
    let calls = Arc::new(AtomicUsize::new(0));
    let double = cached(manager, "double").ttl(Duration::from_secs(60));

    let mut results = Vec::new();
    for x in [5, 5, 6] {
        let calls = calls.clone();
        let value = double
            .call(&x, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(x * 2)
            })
            .await
            .unwrap();
        results.push(value);
    }

    assert_eq!(results, vec![10, 10, 12]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cached_operation_reruns_after_expiry() {
    let manager = full_manager();
    let calls = Arc::new(AtomicUsize::new(0));
    let double = cached(manager, "double").ttl(Duration::from_millis(150));

    let run = |x: i32| {
        let calls = calls.clone();
        let double = double.clone();
        async move {
            double
                .call(&x, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(x * 2)
                })
                .await
                .unwrap()
        }
    };

    assert_eq!(run(5).await, 10);
    assert_eq!(run(5).await, 10);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(run(5).await, 10);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cached_operation_reruns_after_invalidation() {
    let manager = full_manager();
    let calls = Arc::new(AtomicUsize::new(0));
    let double = cached(manager.clone(), "double")
        .ttl(Duration::from_secs(60))
        .tags(["doubles"]);

    let run = |x: i32| {
        let calls = calls.clone();
        let double = double.clone();
        async move {
            double
                .call(&x, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(x * 2)
                })
                .await
                .unwrap()
        }
    };

    run(5).await;
    run(5).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(manager.invalidate_by_tag("doubles").await, 1);
    run(5).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let key = double.key_for(&5).unwrap();
    assert!(manager.delete(&key).await);
    run(5).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Cached again after the last run
    run(5).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_warm_cache_skips_failed_loaders() {
    let manager = full_manager();
    let entries = vec![
        (
            "k1".to_string(),
            Loader::typed(|| async { Ok(Some("v1")) }),
        ),
        (
            "k2".to_string(),
            Loader::new(|| async { Err(anyhow::anyhow!("upstream unavailable")) }),
        ),
        ("k3".to_string(), Loader::new(|| async { Ok(None) })),
    ];

    assert_eq!(manager.warm_cache(entries, "default").await, 1);

    let (value, hit) = manager.get("k1", "default", None).await;
    assert_eq!(value, Some("v1".into()));
    assert!(hit);
    assert_eq!(manager.get("k2", "default", None).await, (None, false));
    assert!(manager.get_metrics().await.errors >= 1);
}

#[tokio::test]
async fn test_entry_expires_after_ttl() {
    let manager = full_manager();
    manager
        .set("short", &"lived".into(), Some(Duration::from_millis(100)), "default", None)
        .await;
    assert!(manager.get("short", "default", None).await.1);

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(manager.get("short", "default", None).await, (None, false));
}

#[tokio::test]
async fn test_hybrid_entry_expires_in_every_tier() {
    let manager = full_manager();
    manager
        .set("mp", &"x".into(), Some(Duration::from_millis(300)), "meal_plan", None)
        .await;
    assert!(manager.get("mp", "meal_plan", None).await.1);

    tokio::time::sleep(Duration::from_millis(500)).await;

    // The table tier must not resurrect the entry into faster tiers
    assert_eq!(manager.get("mp", "meal_plan", None).await, (None, false));
    for tier in CacheTier::HYBRID_ORDER {
        assert!(!manager.exists("mp", Some(tier)).await, "still live in {}", tier);
    }
}

#[tokio::test]
async fn test_memory_tier_evicts_least_recently_used() {
    let config = CacheConfig::builder().memory_max_size(3).build();
    let manager = CacheManager::new(config, CacheClients::none()).unwrap();

    for key in ["a", "b", "c"] {
        manager.set(key, &key.into(), None, "default", None).await;
    }
    // Touch "a" so "b" becomes the oldest
    assert!(manager.get("a", "default", None).await.1);
    manager.set("d", &"d".into(), None, "default", None).await;

    assert!(manager.exists("a", Some(CacheTier::Memory)).await);
    assert!(!manager.exists("b", Some(CacheTier::Memory)).await);
    assert!(manager.exists("d", Some(CacheTier::Memory)).await);
    assert_eq!(manager.get_metrics().await.evictions, 1);
}

#[test]
fn test_keys_ignore_parameter_order() {
    let keys = CacheKeyBuilder::new("nutri", "v1");

    let mut reordered = Map::new();
    reordered.insert("b".to_string(), json!(2));
    reordered.insert("a".to_string(), json!(1));

    assert_eq!(
        keys.build_key("food", "search", Some(&json!({"a": 1, "b": 2})), None, None),
        keys.build_key("food", "search", Some(&Value::Object(reordered)), None, None)
    );
    assert_ne!(
        keys.build_key("food", "search", Some(&json!({"a": 1})), None, None),
        keys.build_key("food", "search", Some(&json!({"a": 2})), None, None)
    );
}

#[tokio::test]
async fn test_write_through_failure_is_reported() {
    let (manager, _, table) = manager_with_handles();
    table.set_offline(true);

    let stored = manager
        .set_as("u:2", &json!({"kcal": 1900}), None, "user_data", None)
        .await;
    assert!(!stored);
    assert!(manager.get_metrics().await.errors >= 1);

    // The cache leg is not rolled back
    let redis = manager.backend(CacheTier::Redis).unwrap();
    assert!(redis.get("u:2").await.unwrap().is_some());
}

#[tokio::test]
async fn test_write_through_persists_to_store() {
    let manager = full_manager();
    assert!(manager.set("u:3", &"goals".into(), None, "user_data", None).await);

    let store = manager.backend(CacheTier::Database).unwrap();
    assert_eq!(store.get("u:3").await.unwrap(), Some("goals".into()));

    // Lost from redis, recovered from the store
    manager.backend(CacheTier::Redis).unwrap().delete("u:3").await.unwrap();
    let (value, hit) = manager.get("u:3", "user_data", None).await;
    assert_eq!(value, Some("goals".into()));
    assert!(!hit);
    assert!(manager.exists("u:3", Some(CacheTier::Redis)).await);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let manager = full_manager();
    manager.set("gone", &"soon".into(), None, "user_data", None).await;

    assert!(manager.delete("gone").await);
    assert!(!manager.delete("gone").await);
    assert!(!manager.delete("never-there").await);
    assert_eq!(manager.get_metrics().await.errors, 0);
}

#[tokio::test]
async fn test_hybrid_promotes_lower_tier_hits() {
    let manager = full_manager();
    let store = manager.backend(CacheTier::Database).unwrap();
    store
        .set("plan:1", &json!(["oats"]).into(), Some(Duration::from_secs(60)))
        .await
        .unwrap();

    let (value, hit) = manager.get("plan:1", "meal_plan", None).await;
    assert_eq!(value, Some(json!(["oats"]).into()));
    assert!(hit);

    for tier in [CacheTier::Memory, CacheTier::Redis] {
        assert!(
            manager.exists("plan:1", Some(tier)).await,
            "entry not promoted to {}",
            tier
        );
    }

    let metrics = manager.get_metrics().await;
    assert_eq!(metrics.tier_hits.get(&CacheTier::Database), Some(&1));
}

#[tokio::test]
async fn test_hybrid_miss_fills_every_tier() {
    let manager = full_manager();
    let loader = Loader::typed(|| async { Ok(Some(vec!["soup", "salad"])) });

    let (value, hit) = manager.get("plan:2", "meal_plan", Some(&loader)).await;
    assert_eq!(value, Some(json!(["soup", "salad"]).into()));
    assert!(!hit);

    for tier in CacheTier::HYBRID_ORDER {
        assert!(manager.exists("plan:2", Some(tier)).await);
    }
    assert!(manager.get("plan:2", "meal_plan", Some(&loader)).await.1);
}

#[tokio::test]
async fn test_write_behind_defers_store_writes() {
    let manager = full_manager();
    let store = manager.backend(CacheTier::Database).unwrap();

    assert!(manager.set("s:1", &json!({"step": 1}).into(), None, "session_data", None).await);
    assert!(store.get("s:1").await.unwrap().is_none());
    assert_eq!(manager.pending_writes().await, 1);

    assert_eq!(manager.flush_write_behind().await, 1);
    assert_eq!(manager.pending_writes().await, 0);
    assert_eq!(store.get("s:1").await.unwrap(), Some(json!({"step": 1}).into()));
}

#[tokio::test]
async fn test_background_flusher_drains_queue() {
    let config = CacheConfig::builder()
        .redis(RedisConfig::default())
        .table(TableConfig::default())
        .enable_metrics(false)
        .write_behind_interval(Duration::from_millis(50))
        .build();
    let manager = Arc::new(CacheManager::new(config, CacheClients::local()).unwrap());
    manager.start_background_tasks().await;

    manager.set("s:2", &"state".into(), None, "session_data", None).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(manager.pending_writes().await, 0);
    assert!(manager.exists("s:2", Some(CacheTier::Database)).await);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_flushes_pending_writes() {
    let manager = full_manager();
    manager.set("s:3", &"state".into(), None, "session_data", None).await;

    manager.shutdown().await;

    assert!(manager.exists("s:3", Some(CacheTier::Database)).await);
}

#[tokio::test]
async fn test_refresh_ahead_reloads_in_background() {
    let manager = full_manager();
    manager
        .set("bmr:1", &json!(1600).into(), Some(Duration::from_secs(1)), "computed_results", None)
        .await;

    let loader = Loader::typed(|| async { Ok(Some(1650)) });

    // Served from cache while the reload runs
    let (value, hit) = manager.get("bmr:1", "computed_results", Some(&loader)).await;
    assert_eq!(value, Some(json!(1600).into()));
    assert!(hit);

    tokio::time::sleep(Duration::from_millis(100)).await;

    let (value, hit) = manager.get("bmr:1", "computed_results", None).await;
    assert_eq!(value, Some(json!(1650).into()));
    assert!(hit);
}

#[tokio::test]
async fn test_offline_redis_degrades_to_miss() {
    let (manager, key_value, _) = manager_with_handles();
    manager.set("u:4", &"cached".into(), None, "user_data", None).await;

    key_value.set_offline(true);

    assert_eq!(manager.get("u:4", "user_data", None).await, (None, false));
    assert!(!manager.set("u:5", &"lost".into(), None, "user_data", None).await);
    assert!(!manager.exists("u:4", Some(CacheTier::Redis)).await);

    let metrics = manager.get_metrics().await;
    assert!(metrics.errors >= 3);

    key_value.set_offline(false);
    assert!(manager.get("u:4", "user_data", None).await.1);
}

#[tokio::test]
async fn test_invalidate_user_cache() {
    let manager = full_manager();
    let keys = manager.keys().clone();

    manager
        .set(&keys.build_user_key("42", "goals"), &"a".into(), None, "api_response", None)
        .await;
    manager
        .set(&keys.build_user_key("43", "goals"), &"b".into(), None, "api_response", None)
        .await;

    assert_eq!(manager.invalidate_user_cache("42").await, 1);
    assert!(!manager.exists(&keys.build_user_key("42", "goals"), None).await);
    assert!(manager.exists(&keys.build_user_key("43", "goals"), None).await);
}

#[tokio::test]
async fn test_clear_resets_tiers_and_tags() {
    let manager = full_manager();
    manager
        .set("m", &"1".into(), None, "default", Some(&tags(&["t"])))
        .await;
    manager.set("r", &"2".into(), None, "user_data", None).await;

    assert!(manager.clear(None).await);
    assert!(!manager.exists("m", None).await);
    assert!(!manager.exists("r", None).await);
    assert_eq!(manager.get_status().await.tracked_tags, 0);

    // Unconfigured tier
    assert!(!manager.clear(Some(CacheTier::Cdn)).await);
}

#[tokio::test]
async fn test_metrics_and_status() {
    let manager = full_manager();
    manager.set("k", &"v".into(), None, "default", None).await;
    manager.get("k", "default", None).await;
    manager.get("k", "default", None).await;
    manager.get("missing", "default", None).await;

    let metrics = manager.get_metrics().await;
    assert_eq!(metrics.hits, 2);
    assert_eq!(metrics.misses, 1);
    assert_eq!(metrics.sets, 1);
    assert!((metrics.hit_ratio() - 2.0 / 3.0).abs() < 1e-9);

    let status = manager.get_status().await;
    assert_eq!(
        status.backends,
        vec![CacheTier::Memory, CacheTier::Redis, CacheTier::Database]
    );
    assert!(status.strategies.contains(&CacheStrategy::WriteBehind));
}

#[tokio::test]
async fn test_profiles_loaded_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{ "recipes": {{"tier": "hybrid", "strategy": "cache_aside", "ttl_seconds": 600, "tags": ["recipes"]}} }}"#
    )
    .unwrap();

    let profiles = ProfileTable::from_json_file(file.path()).unwrap();
    let config = CacheConfig::builder()
        .redis(RedisConfig::default())
        .table(TableConfig::default())
        .profiles(profiles)
        .build();
    let manager = CacheManager::new(config, CacheClients::local()).unwrap();

    assert_eq!(
        manager.profiles().get("recipes"),
        Some(
            &CacheProfile::new(CacheTier::Hybrid, CacheStrategy::CacheAside, Duration::from_secs(600))
                .with_tags(["recipes"])
        )
    );

    manager.set("r:1", &"stew".into(), None, "recipes", None).await;
    for tier in CacheTier::HYBRID_ORDER {
        assert!(manager.exists("r:1", Some(tier)).await);
    }
    assert_eq!(manager.invalidate_by_tag("recipes").await, 1);
}

#[tokio::test]
async fn test_static_content_published_to_origin() {
    let objects = Arc::new(LocalObjectStore::new());
    let config = CacheConfig::builder()
        .cdn(CdnConfig {
            // Nothing listens here, so reads fail
            base_url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        })
        .build();
    let manager = CacheManager::new(config, CacheClients::none().with_object_store(objects.clone()))
        .unwrap();

    assert!(
        manager
            .set("menu.json", &json!({"items": 3}).into(), None, "static_content", None)
            .await
    );
    let published = objects.object("menu.json").await.unwrap();
    assert_eq!(published.cache_control, "public, max-age=86400");

    assert_eq!(manager.get("menu.json", "static_content", None).await, (None, false));
    assert!(manager.get_metrics().await.errors >= 1);
}

#[tokio::test]
async fn test_unconfigured_tier_loads_uncached() {
    let manager = CacheManager::new(CacheConfig::default(), CacheClients::none()).unwrap();
    let loader = Loader::typed(|| async { Ok(Some("fresh")) });

    let (value, hit) = manager.get("u:6", "user_data", Some(&loader)).await;
    assert_eq!(value, Some("fresh".into()));
    assert!(!hit);

    assert!(!manager.set("u:6", &"x".into(), None, "user_data", None).await);
}

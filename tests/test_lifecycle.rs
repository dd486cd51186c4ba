//! Integration tests for install and activate

mod common;

use common::*;
use offline_cache::{CacheStorage, EngineConfig, EngineError, LifecycleState, Router};
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn router_with(config: EngineConfig, storage: Arc<InstrumentedStorage>, fetcher: Arc<FakeFetcher>) -> Router {
    Router::new(Arc::new(config), storage, fetcher).unwrap()
}

#[tokio::test]
async fn test_install_precaches_shell() {
    let storage = InstrumentedStorage::new();
    let router = router_with(test_config(), storage.clone(), origin_fetcher());

    let report = router.on_install().await.unwrap();
    assert_eq!(report.cached, vec!["/".to_string(), "/manifest.json".to_string()]);
    assert!(report.is_complete());
    assert_eq!(router.lifecycle_state().await, LifecycleState::Installed);

    let shell = storage.get("app-static-v1", &key("/")).await.unwrap().unwrap();
    assert_eq!(shell.body, "<html>shell</html>");
    assert_eq!(storage.entry_count("app-static-v1").await.unwrap(), 2);
}

#[tokio::test]
async fn test_install_continues_past_failures() {
    let storage = InstrumentedStorage::new();
    let config = EngineConfig {
        precache: vec![
            "/".to_string(),
            "/icons/missing.png".to_string(),
            "/manifest.json".to_string(),
        ],
        ..test_config()
    };
    let router = router_with(config, storage.clone(), origin_fetcher());

    let report = router.on_install().await.unwrap();
    assert_eq!(report.cached.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "/icons/missing.png");
    assert_eq!(router.lifecycle_state().await, LifecycleState::Installed);
}

#[tokio::test]
async fn test_install_offline_still_completes() {
    let fetcher = origin_fetcher();
    fetcher.set_offline(true);
    let router = router_with(test_config(), InstrumentedStorage::new(), fetcher);

    let report = router.on_install().await.unwrap();
    assert!(report.cached.is_empty());
    assert_eq!(report.failed.len(), 2);
}

#[tokio::test]
async fn test_install_fails_when_static_generation_cannot_open() {
    let storage = InstrumentedStorage::new();
    storage.fail_open.store(true, Ordering::SeqCst);
    let router = router_with(test_config(), storage, origin_fetcher());

    assert!(router.on_install().await.is_err());
    assert_eq!(router.lifecycle_state().await, LifecycleState::Redundant);
    assert!(matches!(
        router.on_activate().await,
        Err(EngineError::Lifecycle(_))
    ));
}

#[tokio::test]
async fn test_phases_out_of_order_are_rejected() {
    let router = router_with(test_config(), InstrumentedStorage::new(), origin_fetcher());

    assert!(matches!(
        router.on_activate().await,
        Err(EngineError::Lifecycle(_))
    ));
    assert_eq!(router.lifecycle_state().await, LifecycleState::Parsed);

    router.on_install().await.unwrap();
    assert!(matches!(
        router.on_install().await,
        Err(EngineError::Lifecycle(_))
    ));

    router.on_activate().await.unwrap();
    assert!(matches!(
        router.on_activate().await,
        Err(EngineError::Lifecycle(_))
    ));
}

#[tokio::test]
async fn test_activation_deletes_only_stale_generations() {
    let storage = InstrumentedStorage::new();
    for name in ["app-static-v0", "app-dynamic-v0", "app-image-v0", "legacy-cache"] {
        storage.put(name, &key("/old"), html("old")).await.unwrap();
    }
    storage
        .put("app-image-v1", &key("/photo.png"), png(b"kept"))
        .await
        .unwrap();

    let router = router_with(test_config(), storage.clone(), origin_fetcher());
    router.on_install().await.unwrap();
    let report = router.on_activate().await.unwrap();

    let mut deleted = report.deleted.clone();
    deleted.sort();
    assert_eq!(
        deleted,
        vec!["app-dynamic-v0", "app-image-v0", "app-static-v0", "legacy-cache"]
    );

    let mut remaining = storage.keys().await.unwrap();
    remaining.sort();
    assert_eq!(remaining, vec!["app-image-v1", "app-static-v1"]);
    assert_eq!(router.lifecycle_state().await, LifecycleState::Activated);
}

#[tokio::test]
async fn test_version_bump_retires_previous_generations() {
    let storage = InstrumentedStorage::new();

    let v1 = router_with(test_config(), storage.clone(), origin_fetcher());
    v1.on_install().await.unwrap();
    v1.on_activate().await.unwrap();

    let v2_config = EngineConfig {
        cache_version: "v2".to_string(),
        ..test_config()
    };
    let v2 = router_with(v2_config, storage.clone(), origin_fetcher());
    v2.on_install().await.unwrap();
    let report = v2.on_activate().await.unwrap();

    assert_eq!(report.deleted, vec!["app-static-v1".to_string()]);
    assert_eq!(storage.keys().await.unwrap(), vec!["app-static-v2".to_string()]);
}

#[tokio::test]
async fn test_activation_claims_open_clients() {
    let router = router_with(test_config(), InstrumentedStorage::new(), origin_fetcher());
    router.clients().register("tab-1").await;
    router.clients().register("tab-2").await;

    router.on_install().await.unwrap();
    let report = router.on_activate().await.unwrap();

    assert_eq!(report.claimed, 2);
    assert_eq!(router.clients().controller("tab-1").await.as_deref(), Some("v1"));
    assert_eq!(router.clients().controller("tab-2").await.as_deref(), Some("v1"));
}

#[tokio::test]
async fn test_failed_activation_reverts_and_can_retry() {
    let storage = InstrumentedStorage::new();
    storage.put("app-static-v0", &key("/old"), html("old")).await.unwrap();

    let router = router_with(test_config(), storage.clone(), origin_fetcher());
    router.on_install().await.unwrap();

    storage.fail_deletes.store(true, Ordering::SeqCst);
    assert!(matches!(router.on_activate().await, Err(EngineError::Cache(_))));
    assert_eq!(router.lifecycle_state().await, LifecycleState::Installed);
    assert!(storage.keys().await.unwrap().contains(&"app-static-v0".to_string()));

    storage.fail_deletes.store(false, Ordering::SeqCst);
    let report = router.on_activate().await.unwrap();
    assert_eq!(report.deleted, vec!["app-static-v0".to_string()]);
    assert_eq!(router.lifecycle_state().await, LifecycleState::Activated);
}

//! Integration tests for the disk-backed store

mod common;

use common::*;
use offline_cache::{
    open_storage, CacheStorage, DiskStorage, EngineConfig, RouteOutcome, StorageConfig,
};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_entries_survive_restart() {
    let temp_dir = TempDir::new().unwrap();

    {
        let storage = DiskStorage::new(temp_dir.path()).await.unwrap();
        storage
            .put("app-image-v1", &key("/photo.png"), png(b"persisted pixels"))
            .await
            .unwrap();
    }

    let storage = DiskStorage::new(temp_dir.path()).await.unwrap();
    let cached = storage
        .get("app-image-v1", &key("/photo.png"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.body, "persisted pixels");
    assert_eq!(cached.content_type(), Some("image/png"));
    assert_eq!(storage.keys().await.unwrap(), vec!["app-image-v1".to_string()]);
    assert_eq!(storage.get_stats().l2_hits, 1);

    // Second read comes from memory
    storage.get("app-image-v1", &key("/photo.png")).await.unwrap();
    assert_eq!(storage.get_stats().l1_hits, 1);
}

#[tokio::test]
async fn test_delete_generation_removes_files() {
    let temp_dir = TempDir::new().unwrap();
    let storage = DiskStorage::new(temp_dir.path()).await.unwrap();

    storage.put("app-static-v0", &key("/app.js"), html("old")).await.unwrap();
    assert!(temp_dir.path().join("app-static-v0").exists());

    assert!(storage.delete("app-static-v0").await.unwrap());
    assert!(!temp_dir.path().join("app-static-v0").exists());
    assert!(!storage.delete("app-static-v0").await.unwrap());

    let reopened = DiskStorage::new(temp_dir.path()).await.unwrap();
    assert!(reopened.get("app-static-v0", &key("/app.js")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_offline_restart_serves_from_disk() {
    let temp_dir = TempDir::new().unwrap();
    let storage_config = StorageConfig {
        backend: "disk".to_string(),
        cache_dir: temp_dir.path().to_string_lossy().to_string(),
        ..Default::default()
    };
    let config = EngineConfig {
        storage: storage_config.clone(),
        ..test_config()
    };

    let fetcher = origin_fetcher();
    fetcher.respond(&url("/api/products"), json("[1,2,3]"));
    {
        let storage = open_storage(&storage_config).await.unwrap();
        let router = active_router(config.clone(), storage, fetcher.clone()).await;
        router
            .route(&offline_cache::CacheRequest::get(&url("/api/products")).unwrap())
            .await
            .unwrap();
        router.flush_writes().await;
    }

    // New process, origin unreachable
    fetcher.set_offline(true);
    let storage = open_storage(&storage_config).await.unwrap();
    let router = offline_cache::Router::new(Arc::new(config), storage, fetcher.clone()).unwrap();
    router.on_install().await.unwrap();
    router.on_activate().await.unwrap();

    let outcome = router
        .route(&offline_cache::CacheRequest::get(&url("/api/products")).unwrap())
        .await
        .unwrap();
    match outcome {
        RouteOutcome::Respond(response) => assert_eq!(response.body, "[1,2,3]"),
        RouteOutcome::Passthrough => panic!("expected a cached response"),
    }
}

//! Integration tests for control channel commands

mod common;

use common::*;
use offline_cache::{
    spawn_control_loop, CacheRequest, CacheStorage, CachedResponse, ControlEnvelope, ControlMessage,
    ControlReply, LifecycleState, RouteOutcome, Router,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

async fn seeded_router(storage: Arc<InstrumentedStorage>) -> Router {
    let router = active_router(test_config(), storage.clone(), origin_fetcher()).await;
    storage.put("app-image-v1", &key("/photo.png"), png(b"img")).await.unwrap();
    storage.put("app-dynamic-v1", &key("/api/products"), json("[]")).await.unwrap();
    router
}

#[tokio::test]
async fn test_clear_image_cache_only_removes_images() {
    let storage = InstrumentedStorage::new();
    let router = seeded_router(storage.clone()).await;

    let reply = router.handle_control(ControlMessage::ClearImageCache).await;
    assert_eq!(reply, ControlReply::ok());

    let mut remaining = storage.keys().await.unwrap();
    remaining.sort();
    assert_eq!(remaining, vec!["app-dynamic-v1", "app-static-v1"]);
}

#[tokio::test]
async fn test_clear_all_caches_removes_everything() {
    let storage = InstrumentedStorage::new();
    let router = seeded_router(storage.clone()).await;
    storage.put("unrelated-cache", &key("/x"), html("x")).await.unwrap();

    let reply = router.handle_control(ControlMessage::ClearAllCaches).await;
    assert!(reply.success);
    assert!(storage.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_clear_all_forces_cache_first_to_refetch() {
    let storage = InstrumentedStorage::new();
    let fetcher = origin_fetcher();
    let router = active_router(test_config(), storage.clone(), fetcher.clone()).await;
    fetcher.reset_calls();

    let manifest = CacheRequest::get(&url("/manifest.json")).unwrap();
    router.route(&manifest).await.unwrap();
    assert_eq!(fetcher.calls(), 0);

    router.handle_control(ControlMessage::ClearAllCaches).await;

    let outcome = router.route(&manifest).await.unwrap();
    assert!(matches!(outcome, RouteOutcome::Respond(ref r) if r.status == 200));
    assert_eq!(fetcher.calls_for(&url("/manifest.json")), 1);
}

#[tokio::test]
async fn test_clear_all_drops_writes_still_queued() {
    let storage = InstrumentedStorage::new();
    let fetcher = origin_fetcher();
    fetcher.respond(&url("/assets/app.js"), CachedResponse::new(200, "js"));
    fetcher.respond(&url("/assets/app.css"), CachedResponse::new(200, "css"));
    let router = Arc::new(active_router(test_config(), storage.clone(), fetcher.clone()).await);

    // Both cache-first misses queue a write; the first one is held in the store
    storage.hold_puts.store(true, Ordering::SeqCst);
    let script = CacheRequest::get(&url("/assets/app.js")).unwrap();
    let styles = CacheRequest::get(&url("/assets/app.css")).unwrap();
    router.route(&script).await.unwrap();
    router.route(&styles).await.unwrap();

    let clearing = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.handle_control(ControlMessage::ClearAllCaches).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    storage.release_puts();

    assert!(clearing.await.unwrap().success);
    router.flush_writes().await;
    assert!(storage.keys().await.unwrap().is_empty());

    router.route(&script).await.unwrap();
    router.route(&styles).await.unwrap();
    assert_eq!(fetcher.calls_for(&url("/assets/app.js")), 2);
    assert_eq!(fetcher.calls_for(&url("/assets/app.css")), 2);
}

#[tokio::test]
async fn test_clear_all_right_after_a_miss_leaves_store_empty() {
    let storage = InstrumentedStorage::new();
    let fetcher = origin_fetcher();
    fetcher.respond(&url("/app.js"), CachedResponse::new(200, "js"));
    let router = active_router(test_config(), storage.clone(), fetcher.clone()).await;

    let request = CacheRequest::get(&url("/app.js")).unwrap();
    router.route(&request).await.unwrap();
    router.handle_control(ControlMessage::ClearAllCaches).await;
    router.flush_writes().await;

    assert!(storage.keys().await.unwrap().is_empty());
    router.route(&request).await.unwrap();
    assert_eq!(fetcher.calls_for(&url("/app.js")), 2);
}

#[tokio::test]
async fn test_clear_commands_are_idempotent() {
    let router = seeded_router(InstrumentedStorage::new()).await;

    for _ in 0..3 {
        assert!(router.handle_control(ControlMessage::ClearImageCache).await.success);
        assert!(router.handle_control(ControlMessage::ClearAllCaches).await.success);
    }
}

#[tokio::test]
async fn test_clear_failure_is_reported() {
    let storage = InstrumentedStorage::new();
    let router = seeded_router(storage.clone()).await;
    storage.fail_deletes.store(true, Ordering::SeqCst);

    let reply = router.handle_control(ControlMessage::ClearImageCache).await;
    assert!(!reply.success);
    assert!(reply.error.unwrap().contains("delete refused"));
}

#[tokio::test]
async fn test_skip_waiting_activates_installed_worker() {
    let router = Router::new(
        Arc::new(test_config()),
        InstrumentedStorage::new(),
        origin_fetcher(),
    )
    .unwrap();
    router.on_install().await.unwrap();

    let reply = router.handle_control_json(r#"{"type":"SKIP_WAITING"}"#).await;
    assert!(reply.success);
    assert_eq!(router.lifecycle_state().await, LifecycleState::Activated);
}

#[tokio::test]
async fn test_skip_waiting_is_noop_otherwise() {
    let router = Router::new(
        Arc::new(test_config()),
        InstrumentedStorage::new(),
        origin_fetcher(),
    )
    .unwrap();

    assert!(router.handle_control(ControlMessage::SkipWaiting).await.success);
    assert_eq!(router.lifecycle_state().await, LifecycleState::Parsed);

    router.on_install().await.unwrap();
    router.on_activate().await.unwrap();
    assert!(router.handle_control(ControlMessage::SkipWaiting).await.success);
    assert_eq!(router.lifecycle_state().await, LifecycleState::Activated);
}

#[tokio::test]
async fn test_malformed_messages_get_failed_reply() {
    let router = seeded_router(InstrumentedStorage::new()).await;

    for raw in ["", "{", r#"{"type":"FORMAT_DISK"}"#, r#"{"type":42}"#, "[]"] {
        let reply = router.handle_control_json(raw).await;
        assert!(!reply.success, "expected failure for {:?}", raw);
        assert!(reply.error.is_some());
    }

    let invalid = router
        .control_metrics()
        .commands_total
        .with_label_values(&["invalid"])
        .get();
    assert_eq!(invalid, 5.0);
}

#[tokio::test]
async fn test_control_loop_replies_on_port() {
    let storage = InstrumentedStorage::new();
    let router = seeded_router(storage.clone()).await;
    let (tx, handle) = spawn_control_loop(router.control_handler(), 8);

    let (envelope, reply_rx) = ControlEnvelope::with_reply(ControlMessage::ClearImageCache);
    tx.send(envelope).await.unwrap();
    assert_eq!(reply_rx.await.unwrap(), ControlReply::ok());
    assert!(!storage.keys().await.unwrap().contains(&"app-image-v1".to_string()));

    // Without a reply port the command still runs
    tx.send(ControlEnvelope::fire(ControlMessage::ClearAllCaches))
        .await
        .unwrap();
    drop(tx);
    handle.await.unwrap();
    assert!(storage.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_control_metrics_track_results() {
    let storage = InstrumentedStorage::new();
    let router = seeded_router(storage.clone()).await;

    router.handle_control(ControlMessage::ClearAllCaches).await;
    storage.fail_deletes.store(true, Ordering::SeqCst);
    storage.put("app-image-v1", &key("/a.png"), png(b"a")).await.unwrap();
    router.handle_control(ControlMessage::ClearImageCache).await;

    let metrics = router.control_metrics();
    assert_eq!(
        metrics
            .commands_by_result
            .with_label_values(&["clear_all_caches", "success"])
            .get(),
        1.0
    );
    assert_eq!(
        metrics
            .commands_by_result
            .with_label_values(&["clear_image_cache", "failure"])
            .get(),
        1.0
    );
    assert_eq!(
        metrics
            .generations_cleared_total
            .with_label_values(&["clear_all_caches"])
            .get(),
        3.0
    );
}

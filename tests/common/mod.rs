//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use offline_cache::{
    CacheRequest, CacheStorage, CachedResponse, EngineConfig, EngineError, Fetcher,
    MemoryStorage, RequestKey, Result, Router,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const ORIGIN: &str = "https://app.example";

/// Fetcher answering from a fixed table, with an offline switch
///
/// Unknown URLs resolve to a 404. While offline every fetch fails with a
/// network error.
#[derive(Default)]
pub struct FakeFetcher {
    responses: Mutex<HashMap<String, CachedResponse>>,
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
    failure: Mutex<Option<EngineError>>,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, url: &str, response: CachedResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail every fetch with `error` instead of answering
    pub fn fail_with(&self, error: EngineError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    /// Total number of network attempts
    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|called| called.as_str() == url)
            .count()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push(url.clone());

        if self.offline.load(Ordering::SeqCst) {
            return Err(EngineError::Network(format!("offline: {}", url)));
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }

        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .unwrap_or_else(|| CachedResponse::new(404, "not found")))
    }
}

/// Memory storage that counts operations and can be told to fail
#[derive(Default)]
pub struct InstrumentedStorage {
    inner: MemoryStorage,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
    pub fail_open: AtomicBool,
    pub fail_puts: AtomicBool,
    pub fail_deletes: AtomicBool,
    /// While set, every put waits for [`InstrumentedStorage::release_puts`]
    pub hold_puts: AtomicBool,
    put_release: Notify,
}

impl InstrumentedStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Let held puts complete and stop holding new ones
    pub fn release_puts(&self) {
        self.hold_puts.store(false, Ordering::SeqCst);
        self.put_release.notify_one();
    }
}

#[async_trait]
impl CacheStorage for InstrumentedStorage {
    async fn open(&self, generation: &str) -> Result<()> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(EngineError::Cache("quota exceeded".to_string()));
        }
        self.inner.open(generation).await
    }

    async fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(generation, key).await
    }

    async fn put(&self, generation: &str, key: &RequestKey, response: CachedResponse) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.hold_puts.load(Ordering::SeqCst) {
            self.put_release.notified().await;
        }
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(EngineError::Cache("quota exceeded".to_string()));
        }
        self.inner.put(generation, key, response).await
    }

    async fn delete(&self, generation: &str) -> Result<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(EngineError::Cache("delete refused".to_string()));
        }
        self.inner.delete(generation).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys().await
    }

    async fn entry_count(&self, generation: &str) -> Result<usize> {
        self.inner.entry_count(generation).await
    }
}

/// Configuration used across the integration tests
pub fn test_config() -> EngineConfig {
    EngineConfig {
        origin: ORIGIN.to_string(),
        bypass: vec![
            "google-analytics.com".to_string(),
            "thirdpartycdn.example".to_string(),
        ],
        precache: vec!["/".to_string(), "/manifest.json".to_string()],
        ..Default::default()
    }
}

pub fn url(path: &str) -> String {
    format!("{}{}", ORIGIN, path)
}

pub fn key(path: &str) -> RequestKey {
    CacheRequest::get(&url(path)).unwrap().key()
}

pub fn html(body: &str) -> CachedResponse {
    CachedResponse::new(200, body.to_string()).with_header("content-type", "text/html")
}

pub fn json(body: &str) -> CachedResponse {
    CachedResponse::new(200, body.to_string()).with_header("content-type", "application/json")
}

pub fn png(bytes: &[u8]) -> CachedResponse {
    CachedResponse::new(200, bytes.to_vec()).with_header("content-type", "image/png")
}

/// Fetcher serving the precache list of [`test_config`]
pub fn origin_fetcher() -> Arc<FakeFetcher> {
    let fetcher = FakeFetcher::new();
    fetcher.respond(&url("/"), html("<html>shell</html>"));
    fetcher.respond(
        &url("/manifest.json"),
        CachedResponse::new(200, r#"{"name":"app"}"#).with_header("content-type", "application/manifest+json"),
    );
    fetcher
}

/// Router that has completed install and activate
pub async fn active_router(
    config: EngineConfig,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
) -> Router {
    let router = Router::new(Arc::new(config), storage, fetcher).unwrap();
    router.on_install().await.unwrap();
    router.on_activate().await.unwrap();
    router
}

//! Fetch strategies
//!
//! Three strategies decide the order in which network and cache are
//! consulted:
//!
//! - **Network-first** (API, navigation, other): network, then any current
//!   generation. Successful responses are persisted to the dynamic
//!   generation in the background.
//! - **Cache-first** (static assets): static generation, then network.
//!   Successful responses are persisted to the static generation in the
//!   background.
//! - **Local-image** (same-origin images): network, then the image
//!   generation. `ok` image responses are written before returning; a miss
//!   after a network failure propagates the original network error.
//!
//! Each layer is tried exactly once; there are no retries.

use crate::classifier::RouteClass;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::fetcher::Fetcher;
use crate::metrics::EngineMetrics;
use crate::models::{CacheRequest, CachedResponse, GenerationKind, RequestKey};
use crate::store::CacheStorage;
use crate::write_behind::WriteBehind;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fetch strategy selected by classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    NetworkFirst,
    CacheFirst,
    LocalImage,
}

impl Strategy {
    /// Strategy for a classification; `None` for bypassed requests
    ///
    /// Unclassified requests share the API handling.
    pub fn for_class(class: RouteClass) -> Option<Strategy> {
        match class {
            RouteClass::Bypass(_) => None,
            RouteClass::Image => Some(Strategy::LocalImage),
            RouteClass::StaticAsset => Some(Strategy::CacheFirst),
            RouteClass::Api | RouteClass::Navigation | RouteClass::Other => {
                Some(Strategy::NetworkFirst)
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::NetworkFirst => "network-first",
            Strategy::CacheFirst => "cache-first",
            Strategy::LocalImage => "local-image",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs strategies against a store and a fetcher
pub struct StrategyEngine {
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    writer: Arc<WriteBehind>,
    metrics: Arc<EngineMetrics>,
    static_cache: String,
    dynamic_cache: String,
    image_cache: String,
}

impl StrategyEngine {
    /// Create the engine on top of a shared background writer
    pub fn new(
        config: &EngineConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        writer: Arc<WriteBehind>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        StrategyEngine {
            storage,
            fetcher,
            writer,
            metrics,
            static_cache: config.generation_name(GenerationKind::Static),
            dynamic_cache: config.generation_name(GenerationKind::Dynamic),
            image_cache: config.generation_name(GenerationKind::Image),
        }
    }

    /// Name of the current generation of the given kind
    pub fn generation(&self, kind: GenerationKind) -> &str {
        match kind {
            GenerationKind::Static => &self.static_cache,
            GenerationKind::Dynamic => &self.dynamic_cache,
            GenerationKind::Image => &self.image_cache,
        }
    }

    /// Run a strategy
    ///
    /// `Err` means both layers were exhausted; the error is the one from
    /// the network attempt.
    pub async fn execute(&self, strategy: Strategy, request: &CacheRequest) -> Result<CachedResponse> {
        match strategy {
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::LocalImage => self.local_image(request).await,
        }
    }

    pub async fn network_first(&self, request: &CacheRequest) -> Result<CachedResponse> {
        let key = request.key();

        match self.fetch(request).await {
            Ok(response) => {
                if response.is_ok() {
                    self.writer.enqueue(&self.dynamic_cache, key, response.clone());
                }
                Ok(response)
            }
            Err(network_error) if network_error.is_network_error() => {
                debug!("Network-first: network failed for {}, trying cache", key);
                match self.lookup_current(&key).await {
                    Some(cached) => Ok(cached),
                    None => Err(network_error),
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn cache_first(&self, request: &CacheRequest) -> Result<CachedResponse> {
        let key = request.key();

        if let Some(cached) = self.lookup(&self.static_cache, &key).await {
            debug!("Cache-first: served {} from cache", key);
            return Ok(cached);
        }

        let response = self.fetch(request).await?;
        if response.is_ok() {
            self.writer.enqueue(&self.static_cache, key, response.clone());
        }
        Ok(response)
    }

    pub async fn local_image(&self, request: &CacheRequest) -> Result<CachedResponse> {
        let key = request.key();

        match self.fetch(request).await {
            Ok(response) => {
                if response.is_ok() && response.is_image() {
                    // Awaited so that a later fallback read sees this entry
                    match self.storage.put(&self.image_cache, &key, response.clone()).await {
                        Ok(()) => {
                            self.metrics.record_cache_write(true);
                            debug!("Local-image: stored {} in {}", key, self.image_cache);
                        }
                        Err(e) => {
                            self.metrics.record_cache_write(false);
                            warn!("Local-image: failed to cache {}: {}", key, e);
                        }
                    }
                } else {
                    debug!(
                        "Local-image: not caching {} (status={}, content-type={:?})",
                        key,
                        response.status,
                        response.content_type()
                    );
                }
                Ok(response)
            }
            Err(network_error) if network_error.is_network_error() => {
                match self.lookup(&self.image_cache, &key).await {
                    Some(cached) => Ok(cached),
                    None => Err(network_error),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Look up one generation; read failures count as misses
    pub async fn lookup(&self, generation: &str, key: &RequestKey) -> Option<CachedResponse> {
        match self.storage.get(generation, key).await {
            Ok(Some(response)) => {
                self.metrics.record_cache_hit(response.body.len() as u64);
                debug!("Cache hit: {} in {}", key, generation);
                Some(response)
            }
            Ok(None) => {
                self.metrics.record_cache_miss();
                debug!("Cache miss: {} in {}", key, generation);
                None
            }
            Err(e) => {
                self.metrics.record_cache_miss();
                warn!("Cache read failed for {} in {}: {}", key, generation, e);
                None
            }
        }
    }

    /// Look up every current generation; stale generations are never read
    pub async fn lookup_current(&self, key: &RequestKey) -> Option<CachedResponse> {
        for generation in [&self.static_cache, &self.dynamic_cache, &self.image_cache] {
            if let Some(response) = self.lookup(generation, key).await {
                return Some(response);
            }
        }
        None
    }

    /// Wait for queued background writes to land
    pub async fn flush_writes(&self) {
        self.writer.flush().await;
    }

    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.metrics
                    .record_network_fetch(true, response.body.len() as u64);
                Ok(response)
            }
            Err(e) => {
                self.metrics.record_network_fetch(false, 0);
                warn!("Network fetch failed for {}: {}", request.url, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::BypassReason;

    #[test]
    fn test_strategy_for_class() {
        assert_eq!(Strategy::for_class(RouteClass::Api), Some(Strategy::NetworkFirst));
        assert_eq!(Strategy::for_class(RouteClass::Navigation), Some(Strategy::NetworkFirst));
        assert_eq!(Strategy::for_class(RouteClass::Other), Some(Strategy::NetworkFirst));
        assert_eq!(Strategy::for_class(RouteClass::StaticAsset), Some(Strategy::CacheFirst));
        assert_eq!(Strategy::for_class(RouteClass::Image), Some(Strategy::LocalImage));
        assert_eq!(Strategy::for_class(RouteClass::Bypass(BypassReason::NonGet)), None);
        assert_eq!(Strategy::for_class(RouteClass::Bypass(BypassReason::BypassList)), None);
    }
}

//! Request router
//!
//! The single entry point of the engine. A [`Router`] owns the classifier,
//! the strategy engine, the fallback handler, the lifecycle and the control
//! handler, and wires them together per request:
//!
//! ```text
//! request -> classify -> (bypass | external image) -> Passthrough
//!                     -> strategy -> response
//!                                 -> exhausted -> fallback
//! ```

use crate::classifier::{RequestClassifier, RouteClass};
use crate::config::EngineConfig;
use crate::control::{ControlHandler, ControlMessage, ControlReply};
use crate::control_metrics::ControlMetrics;
use crate::error::{EngineError, Result};
use crate::fallback::FallbackHandler;
use crate::fetcher::Fetcher;
use crate::lifecycle::{ActivationReport, ClientRegistry, InstallReport, Lifecycle, LifecycleState};
use crate::metrics::EngineMetrics;
use crate::models::{CacheRequest, CachedResponse, GenerationKind};
use crate::push::{self, ClickOutcome, Notification};
use crate::store::CacheStorage;
use crate::strategy::{Strategy, StrategyEngine};
use crate::write_behind::WriteBehind;
use prometheus::Registry;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// What the interception layer should do with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Not intercepted; let the request go to the network unchanged
    Passthrough,
    /// Answer the request with this response
    Respond(CachedResponse),
}

impl RouteOutcome {
    pub fn is_passthrough(&self) -> bool {
        matches!(self, RouteOutcome::Passthrough)
    }

    pub fn into_response(self) -> Option<CachedResponse> {
        match self {
            RouteOutcome::Passthrough => None,
            RouteOutcome::Respond(response) => Some(response),
        }
    }
}

/// Offline cache engine for one cache version
///
/// Shared between request tasks behind an `Arc`; every method takes `&self`.
pub struct Router {
    config: Arc<EngineConfig>,
    classifier: RequestClassifier,
    engine: StrategyEngine,
    fallback: FallbackHandler,
    lifecycle: Arc<Lifecycle>,
    control: Arc<ControlHandler>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    metrics: Arc<EngineMetrics>,
}

impl Router {
    /// Create a router with control metrics in a private registry
    ///
    /// # Arguments
    /// * `config` - Engine configuration; validated here
    /// * `storage` - Cache store holding the generations
    /// * `fetcher` - Network access
    ///
    /// # Errors
    /// Returns `EngineError::Config` if the configuration is invalid.
    ///
    /// Must be called within a Tokio runtime: the background writer task is
    /// spawned here.
    ///
    /// # Example
    /// ```no_run
    /// use offline_cache::{EngineConfig, HttpFetcher, MemoryStorage, Router};
    /// use std::sync::Arc;
    ///
    /// # async fn run() -> offline_cache::Result<()> {
    /// let router = Router::new(
    ///     Arc::new(EngineConfig::default()),
    ///     Arc::new(MemoryStorage::new()),
    ///     Arc::new(HttpFetcher::new()?),
    /// )?;
    /// router.on_install().await?;
    /// router.on_activate().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(
        config: Arc<EngineConfig>,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        Self::with_registry(config, storage, fetcher, &Registry::new())
    }

    /// Create a router registering its control metrics in `registry`
    pub fn with_registry(
        config: Arc<EngineConfig>,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        registry: &Registry,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(EngineMetrics::new());
        let control_metrics = ControlMetrics::with_registry(registry).map_err(|e| {
            EngineError::Config(format!("Failed to register control metrics: {}", e))
        })?;

        let classifier = RequestClassifier::new(Arc::clone(&config))?;
        let writer = Arc::new(WriteBehind::spawn(Arc::clone(&storage), Arc::clone(&metrics)));
        let engine = StrategyEngine::new(
            &config,
            Arc::clone(&storage),
            Arc::clone(&fetcher),
            Arc::clone(&writer),
            Arc::clone(&metrics),
        );
        let fallback = FallbackHandler::new(&config, Arc::clone(&metrics))?;
        let lifecycle = Arc::new(Lifecycle::new(
            Arc::clone(&config),
            Arc::clone(&storage),
            Arc::clone(&fetcher),
            Arc::clone(&writer),
            Arc::new(ClientRegistry::new()),
        ));
        let control = Arc::new(ControlHandler::new(
            Arc::clone(&storage),
            Arc::clone(&lifecycle),
            writer,
            config.generation_name(GenerationKind::Image),
            control_metrics,
        ));

        Ok(Router {
            config,
            classifier,
            engine,
            fallback,
            lifecycle,
            control,
            storage,
            fetcher,
            metrics,
        })
    }

    /// Install phase: precache the shell into the static generation
    pub async fn on_install(&self) -> Result<InstallReport> {
        self.lifecycle.install().await
    }

    /// Activate phase: delete stale generations and claim clients
    pub async fn on_activate(&self) -> Result<ActivationReport> {
        self.lifecycle.activate().await
    }

    /// Decide how to answer an intercepted request
    ///
    /// # Returns
    /// * `Ok(Passthrough)` - bypassed, external image, or not yet activated
    /// * `Ok(Respond(..))` - from network, cache or fallback
    /// * `Err(..)` - an image request that neither network nor cache could
    ///   serve (the original network error), or a local failure that is not
    ///   a network error
    pub async fn route(&self, request: &CacheRequest) -> Result<RouteOutcome> {
        if !self.lifecycle.is_active().await {
            debug!("Not activated, passing through: {}", request.url);
            self.metrics.record_passthrough();
            return Ok(RouteOutcome::Passthrough);
        }

        let class = self.classifier.classify(request);

        let strategy = match Strategy::for_class(class) {
            Some(strategy) => strategy,
            None => {
                debug!("Bypassed ({}): {}", class, request.url);
                self.metrics.record_passthrough();
                return Ok(RouteOutcome::Passthrough);
            }
        };

        if class == RouteClass::Image && self.classifier.is_external(request) {
            debug!("External image, passing through: {}", request.url);
            self.metrics.record_passthrough();
            return Ok(RouteOutcome::Passthrough);
        }

        debug!("Dispatching {} request to {}: {}", class, strategy, request.url);
        self.metrics.record_dispatch(strategy);
        let start = Instant::now();

        let result = match self.engine.execute(strategy, request).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_network_error() => {
                self.fallback.handle(class, e, &self.engine).await
            }
            Err(e) => {
                warn!("{} request failed without a network error: {}", class, e);
                Err(e)
            }
        };

        self.metrics.record_request_duration(start.elapsed());
        result.map(RouteOutcome::Respond)
    }

    /// Forward a request to the network without touching the cache
    pub async fn forward(&self, request: &CacheRequest) -> Result<CachedResponse> {
        self.fetcher.fetch(request).await
    }

    pub async fn handle_control(&self, message: ControlMessage) -> ControlReply {
        self.control.handle(message).await
    }

    pub async fn handle_control_json(&self, raw: &str) -> ControlReply {
        self.control.handle_json(raw).await
    }

    /// Handler to drive with [`crate::control::spawn_control_loop`]
    pub fn control_handler(&self) -> Arc<ControlHandler> {
        Arc::clone(&self.control)
    }

    pub fn notification_for(&self, payload: Option<&str>) -> Notification {
        push::notification_for(&self.config.notification, payload)
    }

    pub fn notification_click(&self, action: Option<&str>) -> ClickOutcome {
        push::click_outcome(action)
    }

    /// Wait for background cache writes queued so far
    pub async fn flush_writes(&self) {
        self.engine.flush_writes().await;
    }

    pub async fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state().await
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        self.lifecycle.clients()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn control_metrics(&self) -> &ControlMetrics {
        self.control.metrics()
    }
}

//! Offline Cache Engine
//!
//! A request-caching engine for a client application's background worker.
//! It intercepts outgoing requests and decides, per request, whether to
//! serve from a local store, fetch from the network, or leave the request
//! alone, while keeping versioned cache partitions consistent across
//! upgrades.
//!
//! # Overview
//!
//! Every request is classified once and dispatched to a fetch strategy:
//!
//! | Class | Strategy | Generation written |
//! |-------|----------|--------------------|
//! | API, navigation, other | network-first | dynamic (background) |
//! | Static asset | cache-first | static (background) |
//! | Same-origin image | local-image | image (awaited) |
//! | Bypassed, external image | passthrough | none |
//!
//! When both network and cache fail, navigations fall back to the cached
//! shell document, images return the network error and everything else gets
//! a `503 Service Unavailable`.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use offline_cache::{CacheRequest, EngineConfig, HttpFetcher, MemoryStorage, RouteOutcome, Router};
//! use std::sync::Arc;
//!
//! # async fn run() -> offline_cache::Result<()> {
//! let config = EngineConfig::from_file("offline_cache.yaml")?;
//! let router = Router::new(
//!     Arc::new(config),
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(HttpFetcher::new()?),
//! )?;
//!
//! router.on_install().await?;
//! router.on_activate().await?;
//!
//! let request = CacheRequest::get("http://localhost:8080/api/products")?;
//! match router.route(&request).await? {
//!     RouteOutcome::Respond(response) => println!("status {}", response.status),
//!     RouteOutcome::Passthrough => println!("not intercepted"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`RequestClassifier`]: ordered rule table producing a [`RouteClass`]
//! - [`StrategyEngine`]: network-first, cache-first and local-image
//! - [`FallbackHandler`]: shell document, offline response or rethrow
//! - [`Lifecycle`]: install, activate, client claiming
//! - [`ControlHandler`]: `SKIP_WAITING`, `CLEAR_IMAGE_CACHE`, `CLEAR_ALL_CACHES`
//! - [`CacheStorage`]: generation-partitioned store ([`MemoryStorage`], [`DiskStorage`])
//! - [`Router`]: wires everything together
//!
//! # Configuration
//!
//! ```yaml
//! cache_prefix: app
//! cache_version: v2
//! origin: "https://app.example"
//! api_prefix: "/api/"
//! bypass:
//!   - google-analytics.com
//! precache:
//!   - /
//!   - /manifest.json
//! storage:
//!   backend: disk
//!   cache_dir: /var/cache/offline-cache
//!   l1_max_size_bytes: 67108864
//! ```
//!
//! See [`EngineConfig`] for every option and its default.

pub mod classifier;
pub mod config;
pub mod control;
pub mod control_metrics;
pub mod error;
pub mod fallback;
pub mod fetcher;
pub mod lifecycle;
pub mod metrics;
pub mod metrics_endpoint;
pub mod models;
pub mod push;
pub mod router;
pub mod server;
pub mod store;
pub mod strategy;
pub mod write_behind;

// Re-export commonly used types
pub use classifier::{BypassReason, RequestClassifier, RouteClass};
pub use config::{EngineConfig, MetricsEndpointConfig, NotificationConfig, StorageConfig};
pub use control::{
    spawn_control_loop, ControlEnvelope, ControlHandler, ControlMessage, ControlReply,
};
pub use control_metrics::ControlMetrics;
pub use error::{EngineError, Result};
pub use fallback::FallbackHandler;
pub use fetcher::{Fetcher, HttpFetcher};
pub use lifecycle::{ActivationReport, ClientRegistry, InstallReport, Lifecycle, LifecycleState};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use models::{CacheRequest, CachedResponse, GenerationKind, RequestKey};
pub use push::{ClickOutcome, Notification};
pub use router::{RouteOutcome, Router};
pub use store::{open_storage, CacheStorage, DiskStorage, MemoryStorage};
pub use strategy::{Strategy, StrategyEngine};
pub use write_behind::WriteBehind;

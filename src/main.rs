//! Offline Cache Proxy Server
//!
//! Loads configuration, sets up logging, installs and activates the current
//! cache version, then serves the interception proxy (and optionally the
//! metrics endpoint) until interrupted.

use anyhow::Context;
use offline_cache::metrics_endpoint::MetricsEndpoint;
use offline_cache::server::ProxyServer;
use offline_cache::{open_storage, EngineConfig, HttpFetcher, Router};
use prometheus::Registry;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Main entry point for the offline cache proxy
///
/// # Usage
/// ```bash
/// # Start with default config (offline_cache.yaml)
/// cargo run
///
/// # Start with custom config
/// cargo run -- /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Offline Cache Proxy");

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "offline_cache.yaml".to_string());

    info!("Loading configuration from: {}", config_path);

    let config = EngineConfig::from_file(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    info!("Configuration loaded successfully");
    info!("  - Origin: {}", config.origin);
    info!("  - Cache version: {}", config.cache_version);
    info!("  - Generations: {:?}", config.current_generations());
    info!("  - Storage backend: {}", config.storage.backend);
    info!("  - Precache entries: {}", config.precache.len());
    info!("  - Bypass fragments: {:?}", config.bypass);

    let listen: SocketAddr = config
        .listen_address
        .parse()
        .with_context(|| format!("invalid listen_address '{}'", config.listen_address))?;

    let storage = open_storage(&config.storage)
        .await
        .context("failed to open cache storage")?;
    let fetcher = HttpFetcher::with_timeout(Duration::from_secs(config.network_timeout_secs))
        .context("failed to create HTTP client")?;

    let registry = Registry::new();
    let metrics_config = config.metrics_endpoint.clone();
    let router = Arc::new(
        Router::with_registry(Arc::new(config), storage, Arc::new(fetcher), &registry)
            .context("failed to create router")?,
    );

    let report = router.on_install().await.context("install failed")?;
    if !report.is_complete() {
        warn!(
            "Install finished with {} precache failures: {:?}",
            report.failed.len(),
            report.failed
        );
    }

    let activation = router.on_activate().await.context("activation failed")?;
    info!("Deleted stale generations: {:?}", activation.deleted);

    if let Some(metrics_config) = metrics_config.filter(|m| m.enabled) {
        let addr: SocketAddr = metrics_config
            .address
            .parse()
            .with_context(|| format!("invalid metrics address '{}'", metrics_config.address))?;
        let endpoint = MetricsEndpoint::new(Arc::clone(&router), addr);
        tokio::spawn(async move {
            if let Err(e) = endpoint.start().await {
                error!("Metrics endpoint stopped: {}", e);
            }
        });
    }

    let server = ProxyServer::new(Arc::clone(&router), listen);

    tokio::select! {
        result = server.start() => {
            result.context("proxy server stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested, flushing pending cache writes");
        }
    }

    router.flush_writes().await;

    let stats = router.metrics().get_stats();
    info!(
        "Served {} requests ({} passthrough), cache hit rate {:.2}%",
        stats.total_requests,
        stats.passthrough_requests,
        stats.cache_hit_rate()
    );

    Ok(())
}

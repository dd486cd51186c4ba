//! Fallback handling once network and cache are both exhausted

use crate::classifier::RouteClass;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::metrics::EngineMetrics;
use crate::models::{resolve_against, CachedResponse, GenerationKind, RequestKey};
use crate::strategy::StrategyEngine;
use std::sync::Arc;
use tracing::{debug, info};

/// Body of the synthetic offline response
pub const OFFLINE_BODY: &str = "Offline - content not available";

/// Content type of the synthetic offline response
pub const OFFLINE_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Decides what to return when a strategy produced nothing
///
/// - Navigation: the cached shell document from the static generation, or
///   the offline response when it is absent.
/// - Image: the original network error, unchanged.
/// - Everything else: the offline response.
pub struct FallbackHandler {
    shell_key: RequestKey,
    metrics: Arc<EngineMetrics>,
}

impl FallbackHandler {
    pub fn new(config: &EngineConfig, metrics: Arc<EngineMetrics>) -> Result<Self> {
        let shell_url = resolve_against(&config.origin_url()?, &config.shell_path)?;

        Ok(FallbackHandler {
            shell_key: RequestKey::for_url(&shell_url),
            metrics,
        })
    }

    /// Synthetic `503 Service Unavailable`
    pub fn offline_response() -> CachedResponse {
        CachedResponse::new(503, OFFLINE_BODY).with_header("content-type", OFFLINE_CONTENT_TYPE)
    }

    pub async fn handle(
        &self,
        class: RouteClass,
        error: EngineError,
        engine: &StrategyEngine,
    ) -> Result<CachedResponse> {
        match class {
            RouteClass::Image => {
                debug!("Fallback: rethrowing image failure: {}", error);
                self.metrics.record_rethrow();
                Err(error)
            }
            RouteClass::Navigation => {
                let static_cache = engine.generation(GenerationKind::Static);
                match engine.lookup(static_cache, &self.shell_key).await {
                    Some(shell) => {
                        info!("Fallback: serving cached shell for offline navigation");
                        self.metrics.record_shell_fallback();
                        Ok(shell)
                    }
                    None => {
                        info!("Fallback: shell not cached, serving offline response");
                        self.metrics.record_unavailable_fallback();
                        Ok(Self::offline_response())
                    }
                }
            }
            _ => {
                debug!("Fallback: {} request unavailable offline: {}", class, error);
                self.metrics.record_unavailable_fallback();
                Ok(Self::offline_response())
            }
        }
    }
}

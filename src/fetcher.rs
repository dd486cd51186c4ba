//! Network fetcher
//!
//! The engine talks to the network only through the [`Fetcher`] trait, so
//! strategies can be exercised against in-process fakes. [`HttpFetcher`] is
//! the production implementation on top of `reqwest`.

use crate::error::{EngineError, Result};
use crate::models::{CacheRequest, CachedResponse};
use async_trait::async_trait;
use http::header::{
    HeaderMap, CONNECTION, CONTENT_LENGTH, HOST, PROXY_AUTHORIZATION, TE, TRANSFER_ENCODING,
    UPGRADE,
};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Performs a single network attempt for a request
///
/// A resolved HTTP response is `Ok` whatever its status; only transport
/// failures (connection errors, timeouts) are `Err`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse>;
}

/// `reqwest`-based fetcher with a fixed per-request timeout
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a new HttpFetcher with default settings
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(10))
    }

    /// Create a new HttpFetcher with a custom timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpFetcher { client })
    }

    /// Headers that describe the hop rather than the request
    fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
        let mut forwarded = headers.clone();
        for name in [
            HOST,
            CONNECTION,
            CONTENT_LENGTH,
            TRANSFER_ENCODING,
            TE,
            UPGRADE,
            PROXY_AUTHORIZATION,
        ] {
            forwarded.remove(name);
        }
        forwarded.remove("proxy-connection");
        forwarded.remove("keep-alive");
        forwarded
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse> {
        debug!("Fetching from network: {} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(Self::forwardable_headers(&request.headers));

        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            warn!("Network request failed for url={}: {}", request.url, e);
            EngineError::from(e)
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            warn!("Failed to read response body for url={}: {}", request.url, e);
            EngineError::from(e)
        })?;

        debug!(
            "Received network response: url={}, status={}, size={}",
            request.url,
            status,
            body.len()
        );

        Ok(CachedResponse::from_parts(status, &headers, body))
    }
}

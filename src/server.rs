//! HTTP interception layer
//!
//! A local forward proxy in front of the [`Router`]. Clients point their
//! HTTP proxy at `listen_address`:
//!
//! - absolute-form targets (`GET http://host/path`) are intercepted as-is
//! - origin-form targets (`GET /path`) are resolved against the configured
//!   origin
//! - `POST {control_path}` in origin form carries a control message
//!
//! Passthrough decisions are forwarded to the network unchanged. Every
//! connection is registered as a client for the lifetime of the connection.

use crate::error::{EngineError, Result};
use crate::models::{CacheRequest, CachedResponse};
use crate::router::{RouteOutcome, Router};
use http::header::{HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::request::Parts;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use url::Url;

/// Proxy server bound to one router
pub struct ProxyServer {
    router: Arc<Router>,
    addr: SocketAddr,
}

impl ProxyServer {
    pub fn new(router: Arc<Router>, addr: SocketAddr) -> Self {
        Self { router, addr }
    }

    /// Serve until the process exits
    pub async fn start(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Offline cache proxy listening on http://{}", self.addr);
        info!(
            "Control endpoint: POST http://{}{}",
            self.addr,
            self.router.config().control_path
        );

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept proxy connection: {}", e);
                    tokio::time::sleep(accept_error_delay(&e)).await;
                    continue;
                }
            };
            let io = TokioIo::new(stream);
            let router = Arc::clone(&self.router);

            tokio::task::spawn(async move {
                let client_id = peer.to_string();
                router.clients().register(&client_id).await;
                debug!("Client connected: {}", client_id);

                let service_router = Arc::clone(&router);
                let service = service_fn(move |req| {
                    let router = Arc::clone(&service_router);
                    async move { serve(req, router).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving proxy connection: {:?}", err);
                }

                router.clients().unregister(&client_id).await;
                debug!("Client disconnected: {}", client_id);
            });
        }
    }
}

/// How long to pause after a failed accept before trying again
///
/// Running out of descriptors or memory does not clear up immediately, so
/// those back off; a connection that died during the handshake does not.
pub(crate) fn accept_error_delay(err: &io::Error) -> Duration {
    // EMFILE, ENFILE, ENOBUFS, ENOMEM
    const EXHAUSTION: [i32; 4] = [24, 23, 105, 12];

    match err.raw_os_error() {
        Some(code) if EXHAUSTION.contains(&code) => Duration::from_millis(100),
        _ if err.kind() == io::ErrorKind::OutOfMemory => Duration::from_millis(100),
        _ => Duration::ZERO,
    }
}

async fn serve(
    req: Request<Incoming>,
    router: Arc<Router>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();
    Ok(handle(&router, parts, body).await)
}

/// Answer one proxied request
pub async fn handle(router: &Router, parts: Parts, body: Bytes) -> Response<Full<Bytes>> {
    if is_control_request(router, &parts) {
        let raw = String::from_utf8_lossy(&body);
        let reply = router.handle_control_json(&raw).await;
        return json_response(reply.to_json());
    }

    let request = match to_cache_request(router, parts, body) {
        Ok(request) => request,
        Err(e) => return error_response(&e),
    };

    let result = match router.route(&request).await {
        Ok(RouteOutcome::Respond(response)) => Ok(response),
        Ok(RouteOutcome::Passthrough) => router.forward(&request).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(response) => to_http_response(response),
        Err(e) => {
            warn!("Request failed: {} {}: {}", request.method, request.url, e);
            error_response(&e)
        }
    }
}

fn is_control_request(router: &Router, parts: &Parts) -> bool {
    parts.method == Method::POST
        && parts.uri.authority().is_none()
        && parts.uri.path() == router.config().control_path
}

/// Build the engine request from the proxied target
fn to_cache_request(router: &Router, parts: Parts, body: Bytes) -> Result<CacheRequest> {
    let url = if parts.uri.scheme().is_some() {
        Url::parse(&parts.uri.to_string())?
    } else {
        let target = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        router.config().origin_url()?.join(target).map_err(|e| {
            EngineError::Parse(format!("cannot resolve request target '{}': {}", target, e))
        })?
    };

    let mut request = CacheRequest::new(parts.method, url).with_body(body);
    request.headers = parts.headers;
    Ok(request)
}

fn to_http_response(cached: CachedResponse) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut headers = cached.header_map();
    for name in [CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING] {
        headers.remove(name);
    }

    let mut response = Response::new(Full::new(cached.body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn json_response(body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn error_response(error: &EngineError) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(error.to_http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::new(Full::new(Bytes::from(error.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

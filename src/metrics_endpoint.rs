//! Metrics HTTP endpoint
//!
//! Serves the engine counters and the control channel registry in Prometheus
//! text format on a separate port:
//!
//! - `/metrics`: Prometheus exposition format
//! - `/health`: liveness plus the lifecycle state
//! - `/`: index page

use crate::error::Result;
use crate::metrics::MetricsSnapshot;
use crate::router::Router;
use crate::server::accept_error_delay;
use http::header::{HeaderValue, CONTENT_TYPE};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Metrics endpoint server
pub struct MetricsEndpoint {
    router: Arc<Router>,
    addr: SocketAddr,
}

impl MetricsEndpoint {
    /// Create a new metrics endpoint
    ///
    /// # Arguments
    /// * `router` - Router whose metrics are exposed
    /// * `addr` - Address to bind the HTTP server to
    pub fn new(router: Arc<Router>, addr: SocketAddr) -> Self {
        Self { router, addr }
    }

    /// Serve until the process exits
    pub async fn start(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Metrics endpoint listening on http://{}", self.addr);
        info!("Metrics available at http://{}/metrics", self.addr);

        loop {
            let stream = match listener.accept().await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!("Failed to accept metrics connection: {}", e);
                    tokio::time::sleep(accept_error_delay(&e)).await;
                    continue;
                }
            };
            let io = TokioIo::new(stream);
            let router = Arc::clone(&self.router);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let router = Arc::clone(&router);
                    async move { handle_request(req, router).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving metrics connection: {:?}", err);
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    router: Arc<Router>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(&router),
        "/health" => health_response(&router).await,
        "/" => index_response(),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "404 Not Found".to_string()),
    };
    Ok(response)
}

fn metrics_response(router: &Router) -> Response<Full<Bytes>> {
    let mut body = format_prometheus_metrics(&router.metrics().get_stats());

    match router.control_metrics().render() {
        Ok(control) => body.push_str(&control),
        Err(e) => warn!("Failed to render control metrics: {}", e),
    }

    text_response(
        StatusCode::OK,
        "text/plain; version=0.0.4; charset=utf-8",
        body,
    )
}

async fn health_response(router: &Router) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "status": "healthy",
        "lifecycle": router.lifecycle_state().await.to_string(),
        "cache_version": router.config().cache_version,
    });
    text_response(StatusCode::OK, "application/json", body.to_string())
}

fn index_response() -> Response<Full<Bytes>> {
    let body = r#"<!DOCTYPE html>
<html>
<head><title>Offline Cache Metrics</title></head>
<body>
    <h1>Offline Cache Metrics Endpoint</h1>
    <ul>
        <li><a href="/metrics">/metrics</a> - Prometheus format metrics</li>
        <li><a href="/health">/health</a> - Health check endpoint</li>
    </ul>
</body>
</html>"#;

    text_response(StatusCode::OK, "text/html; charset=utf-8", body.to_string())
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn write_metric(output: &mut String, name: &str, help: &str, kind: &str, value: String) {
    let _ = writeln!(output, "# HELP offline_cache_{} {}", name, help);
    let _ = writeln!(output, "# TYPE offline_cache_{} {}", name, kind);
    let _ = writeln!(output, "offline_cache_{} {}", name, value);
    output.push('\n');
}

/// Format engine counters in Prometheus exposition format
fn format_prometheus_metrics(s: &MetricsSnapshot) -> String {
    let counters: [(&str, &str, u64); 17] = [
        ("requests_total", "Total number of requests seen", s.total_requests),
        ("passthrough_requests_total", "Requests left to default network handling", s.passthrough_requests),
        ("network_first_requests_total", "Requests dispatched to network-first", s.network_first_requests),
        ("cache_first_requests_total", "Requests dispatched to cache-first", s.cache_first_requests),
        ("local_image_requests_total", "Requests dispatched to local-image", s.local_image_requests),
        ("network_fetches_total", "Network attempts", s.network_fetches),
        ("network_failures_total", "Network attempts that failed", s.network_failures),
        ("bytes_from_network_total", "Bytes received from the network", s.bytes_from_network),
        ("cache_reads_total", "Cache lookups", s.cache_reads),
        ("cache_hits_total", "Cache lookups that hit", s.cache_hits),
        ("cache_misses_total", "Cache lookups that missed", s.cache_misses),
        ("cache_writes_total", "Cache writes applied", s.cache_writes),
        ("cache_write_errors_total", "Cache writes that failed", s.cache_write_errors),
        ("bytes_from_cache_total", "Bytes served from cache", s.bytes_from_cache),
        ("shell_fallbacks_total", "Navigations answered with the cached shell", s.shell_fallbacks),
        ("unavailable_fallbacks_total", "Requests answered with the offline response", s.unavailable_fallbacks),
        ("rethrown_errors_total", "Image failures returned to the caller", s.rethrown_errors),
    ];

    let mut output = String::new();
    for (name, help, value) in counters {
        write_metric(&mut output, name, help, "counter", value.to_string());
    }

    write_metric(
        &mut output,
        "cache_hit_rate",
        "Cache hit rate percentage",
        "gauge",
        format!("{:.2}", s.cache_hit_rate()),
    );
    write_metric(
        &mut output,
        "network_failure_rate",
        "Network failure rate percentage",
        "gauge",
        format!("{:.2}", s.network_failure_rate()),
    );
    write_metric(
        &mut output,
        "request_duration_ms_avg",
        "Average handled request duration in milliseconds",
        "gauge",
        format!("{:.2}", s.avg_request_duration_ms()),
    );

    output
}

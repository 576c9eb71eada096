//! Metrics HTTP Endpoint
//!
//! Second listener next to the proxy port. `/metrics` serves the request
//! counters and store gauges in Prometheus text format, followed by the
//! histograms of the prometheus registry. `/api/*` is handed to the admin API.

use crate::admin::AdminApi;
use crate::metrics::{MetricsSnapshot, TentaMetrics};
use crate::timing_metrics::encode_registry;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::Registry;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

struct EndpointState {
    metrics: Arc<TentaMetrics>,
    registry: Registry,
    admin: AdminApi,
}

/// Metrics and admin endpoint server
pub struct MetricsEndpoint {
    listener: TcpListener,
    state: Arc<EndpointState>,
}

impl MetricsEndpoint {
    /// Bind the endpoint
    ///
    /// # Arguments
    /// * `addr` - Address to bind the HTTP server to
    /// * `metrics` - Shared request counters and store gauges
    /// * `registry` - Registry holding the latency histograms
    /// * `admin` - Admin API answering `/api/*`
    pub async fn bind(
        addr: SocketAddr,
        metrics: Arc<TentaMetrics>,
        registry: Registry,
        admin: AdminApi,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state: Arc::new(EndpointState {
                metrics,
                registry,
                admin,
            }),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve requests until the task is dropped
    pub async fn serve(self) -> io::Result<()> {
        let addr = self.listener.local_addr()?;
        info!("Metrics endpoint listening on http://{}", addr);
        info!("Metrics available at http://{}/metrics", addr);

        loop {
            let (stream, _) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Error accepting metrics connection: {}", e);
                    continue;
                }
            };
            let io = TokioIo::new(stream);
            let state = Arc::clone(&self.state);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { Ok::<_, Infallible>(handle_request(req, &state).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Error serving connection: {:?}", err);
                }
            });
        }
    }
}

async fn handle_request<B>(req: Request<B>, state: &EndpointState) -> Response<Full<Bytes>> {
    let path = req.uri().path();
    if path == "/metrics" {
        metrics_response(state)
    } else if AdminApi::matches(path) {
        state.admin.handle(req).await
    } else {
        text_response(StatusCode::NOT_FOUND, "text/plain", "404 Not Found".to_string())
    }
}

fn metrics_response(state: &EndpointState) -> Response<Full<Bytes>> {
    let mut body = format_prometheus_metrics(&state.metrics.get_stats());
    match encode_registry(&state.registry) {
        Ok(encoded) => body.push_str(&encoded),
        Err(e) => error!("Failed to encode prometheus registry: {}", e),
    }

    text_response(
        StatusCode::OK,
        "text/plain; version=0.0.4; charset=utf-8",
        body,
    )
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(content_type),
    );
    response
}

fn push_metric(output: &mut String, name: &str, kind: &str, help: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("# HELP {} {}\n", name, help));
    output.push_str(&format!("# TYPE {} {}\n", name, kind));
    output.push_str(&format!("{} {}\n", name, value));
}

/// Format the counters and gauges in Prometheus exposition format
fn format_prometheus_metrics(snapshot: &MetricsSnapshot) -> String {
    let mut output = String::new();

    push_metric(&mut output, "tenta_requests_received", "counter", "Number of requests received", snapshot.requests);
    push_metric(&mut output, "tenta_hits", "counter", "Number of requests served from the cache", snapshot.hits);
    push_metric(&mut output, "tenta_misses", "counter", "Number of requests fetched from upstream", snapshot.misses);

    // Store gauges
    push_metric(&mut output, "tenta_files", "gauge", "Number of files in the cache", snapshot.files);
    push_metric(&mut output, "tenta_size", "gauge", "Total size of the cache in bytes", snapshot.size_bytes);

    push_metric(&mut output, "tenta_errors", "counter", "Number of failed requests", snapshot.errors);
    push_metric(&mut output, "tenta_not_found", "counter", "Number of 404 responses from upstream", snapshot.not_found);
    push_metric(&mut output, "tenta_server_errors", "counter", "Number of 5xx responses from upstream", snapshot.server_errors);

    output
}

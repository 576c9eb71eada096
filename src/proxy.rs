//! Caching proxy pipeline
//!
//! Each inbound request runs through:
//!
//! 1. loop check: a request carrying our own marker header is answered
//!    with `508 Loop Detected` and never proxied
//! 2. key derivation from scheme, host, path and user agent
//! 3. store lookup: a hit is read from disk and served
//! 4. on a miss, the upstream fetch; 404, 5xx and uncacheable responses
//!    are relayed, a cacheable `200` is streamed to the client and into
//!    the store at the same time
//!
//! Every request that passes the loop check counts as exactly one hit or
//! one miss.

use crate::cache_control::{declared_length, should_cache};
use crate::cache_key::RequestTarget;
use crate::error::TentaError;
use crate::metrics::TentaMetrics;
use crate::origin::{Origin, OriginResponse, LOOP_MARKER_HEADER, LOOP_MARKER_VALUE};
use crate::store::{CacheStore, WriteOutcome};
use crate::tee::client_channel;
use crate::timing_metrics::TimingMetrics;
use bytes::Bytes;
use futures::StreamExt;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::request::Parts;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Body type of every proxy response
pub type ProxyBody = UnsyncBoxBody<Bytes, io::Error>;

/// Body sent when a request loops back through the proxy
pub const LOOP_DETECTED_BODY: &str = "Proxy loop detected, aborting";

/// Body sent when the origin answers 404
pub const NOT_FOUND_BODY: &str = "404! Not Found";

/// Headers that describe a single connection and are never relayed
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Per-request state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Cache key derived from the request
    pub key: String,
    /// Upstream URL the request resolves to
    pub url: String,
    /// Client user agent, forwarded upstream
    pub user_agent: Option<String>,
    /// Whether the request was issued by this proxy
    pub loop_marker: bool,
}

impl RequestContext {
    /// Build the context for an inbound request
    pub fn from_parts(parts: &Parts) -> Self {
        let target = RequestTarget::from_parts(parts);
        let loop_marker = parts
            .headers
            .get(LOOP_MARKER_HEADER)
            .map(|v| v.as_bytes() == LOOP_MARKER_VALUE.as_bytes())
            .unwrap_or(false);

        RequestContext {
            key: target.cache_key(),
            url: target.url(),
            user_agent: target.user_agent.clone(),
            loop_marker,
        }
    }
}

/// The caching proxy
#[derive(Clone)]
pub struct CacheProxy {
    store: Arc<CacheStore>,
    metrics: Arc<TentaMetrics>,
    origin: Arc<dyn Origin>,
    timing: Option<Arc<TimingMetrics>>,
    max_object_size: u64,
}

impl CacheProxy {
    /// Create a proxy without an object size limit
    pub fn new(store: Arc<CacheStore>, metrics: Arc<TentaMetrics>, origin: Arc<dyn Origin>) -> Self {
        CacheProxy {
            store,
            metrics,
            origin,
            timing: None,
            max_object_size: u64::MAX,
        }
    }

    /// Relay bodies declared larger than `bytes` without storing them
    pub fn with_max_object_size(mut self, bytes: u64) -> Self {
        self.max_object_size = bytes;
        self
    }

    /// Record upstream fetch latency
    pub fn with_timing_metrics(mut self, timing: Arc<TimingMetrics>) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Shared metrics collector
    pub fn metrics(&self) -> &TentaMetrics {
        &self.metrics
    }

    /// Underlying cache store
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Handle one inbound request
    ///
    /// Never fails: every error is turned into a response.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody> {
        let (parts, _) = req.into_parts();
        let ctx = RequestContext::from_parts(&parts);
        self.metrics.inc_requests();

        if ctx.loop_marker {
            warn!("Sending proxy loop detected for {}, aborting", ctx.url);
            self.metrics.inc_errors();
            return error_response(&TentaError::LoopDetected);
        }

        debug!("Request for {} ({})", ctx.key, ctx.url);

        match self.store.exists(&ctx.key).await {
            Ok(true) => {
                self.metrics.inc_hits();
                self.serve_hit(&ctx).await
            }
            Ok(false) => {
                debug!("Cache file {} not found", ctx.key);
                self.metrics.inc_misses();
                self.serve_miss(ctx).await
            }
            Err(e) => {
                error!("Error checking cache file {}: {}", ctx.key, e);
                self.metrics.inc_misses();
                self.metrics.inc_errors();
                error_response(&e)
            }
        }
    }

    async fn serve_hit(&self, ctx: &RequestContext) -> Response<ProxyBody> {
        match self.store.read(&ctx.key).await {
            Ok(data) => {
                info!("Cached file found: {} ({} bytes)", ctx.key, data.len());
                full_response(StatusCode::OK, data)
            }
            Err(e) => {
                error!("Error opening cache file {}: {}", ctx.key, e);
                self.metrics.inc_errors();
                error_response(&TentaError::StoreIoError(e.to_string()))
            }
        }
    }

    async fn serve_miss(&self, ctx: RequestContext) -> Response<ProxyBody> {
        let started = Instant::now();
        let fetched = self.origin.fetch(&ctx.url, ctx.user_agent.as_deref()).await;
        if let Some(timing) = &self.timing {
            timing.record_fetch(fetched.is_ok(), started.elapsed());
        }

        let upstream = match fetched {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!("Error fetching {}: {}", ctx.url, e);
                self.metrics.inc_errors();
                return error_response(&e);
            }
        };

        let status = upstream.status;
        if status == StatusCode::NOT_FOUND
            || status == StatusCode::LOOP_DETECTED
            || status.is_server_error()
        {
            return match TentaError::from_upstream_status(status.as_u16(), ctx.url) {
                e @ TentaError::UpstreamNotFound(_) => {
                    debug!("{}", e);
                    self.metrics.inc_not_found();
                    error_response(&e)
                }
                e @ TentaError::LoopDetected => {
                    warn!("Received proxy loop detected, aborting");
                    self.metrics.inc_errors();
                    error_response(&e)
                }
                e => {
                    warn!("{}", e);
                    self.metrics.inc_server_errors();
                    relay_response(upstream)
                }
            };
        }

        if !should_cache(status, &upstream.headers) {
            return relay_response(upstream);
        }

        if let Some(len) = declared_length(&upstream.headers) {
            if len as u64 > self.max_object_size {
                debug!(
                    "Skipping cache: {} bytes exceeds max object size {}",
                    len, self.max_object_size
                );
                return relay_response(upstream);
            }
        }

        self.stream_into_store(ctx, upstream)
    }

    /// Answer with the upstream body while a background task tees it into the store
    ///
    /// The task holds the client channel open until the entry has been
    /// persisted and the gauges updated, so a client that reads the body to
    /// the end observes the finished entry.
    fn stream_into_store(&self, ctx: RequestContext, upstream: OriginResponse) -> Response<ProxyBody> {
        let OriginResponse {
            status,
            headers,
            body,
        } = upstream;
        let (mut tx, rx) = client_channel();
        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);

        tokio::spawn(async move {
            match store.write_streaming(&ctx.key, body, &mut tx).await {
                Ok(WriteOutcome::Stored(bytes)) => {
                    metrics.record_entry_added(bytes);
                    info!("Cached {} as {} ({} bytes)", ctx.url, ctx.key, bytes);
                }
                Ok(WriteOutcome::AlreadyStored(bytes)) => {
                    debug!("Served {} bytes of {}, entry already present", bytes, ctx.url);
                }
                Ok(WriteOutcome::NotStored { bytes, error }) => {
                    warn!("Error creating local file, sent {} bytes: {}", bytes, error);
                    metrics.inc_errors();
                }
                Err(TentaError::InternalError(reason)) => {
                    debug!("Stopped streaming {}: {}", ctx.url, reason);
                }
                Err(e) => {
                    warn!("Error writing data for {}: {}", ctx.url, e);
                    metrics.inc_errors();
                }
            }
            drop(tx);
        });

        let mut response = Response::new(StreamBody::new(rx).boxed_unsync());
        *response.status_mut() = status;
        copy_end_to_end_headers(&headers, response.headers_mut());
        response
    }
}

/// Relay an upstream response without touching the store
fn relay_response(upstream: OriginResponse) -> Response<ProxyBody> {
    let body = upstream.body.map(|chunk| chunk.map(Frame::data));
    let mut response = Response::new(StreamBody::new(body).boxed_unsync());
    *response.status_mut() = upstream.status;
    copy_end_to_end_headers(&upstream.headers, response.headers_mut());
    response
}

fn copy_end_to_end_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if !HOP_BY_HOP.contains(&name.as_str()) {
            to.append(name.clone(), value.clone());
        }
    }
}

fn full_response(status: StatusCode, data: Bytes) -> Response<ProxyBody> {
    let body = Full::new(data).map_err(|never| match never {}).boxed_unsync();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

fn text_response(status: StatusCode, text: &str) -> Response<ProxyBody> {
    let mut response = full_response(status, Bytes::copy_from_slice(text.as_bytes()));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Response sent to the client for a pipeline error
pub fn error_response(err: &TentaError) -> Response<ProxyBody> {
    let status = StatusCode::from_u16(err.to_http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match err {
        TentaError::LoopDetected => text_response(status, LOOP_DETECTED_BODY),
        TentaError::UpstreamNotFound(_) => text_response(status, NOT_FOUND_BODY),
        TentaError::TransportError(_) | TentaError::Timeout(_) => {
            text_response(status, "Bad gateway: upstream unreachable")
        }
        _ => text_response(status, "Internal server error"),
    }
}

/// Name of the loop marker header as a typed header name
pub fn loop_marker_header() -> HeaderName {
    HeaderName::from_static(LOOP_MARKER_HEADER)
}

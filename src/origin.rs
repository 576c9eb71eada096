//! Upstream fetching
//!
//! [`Origin`] is the seam between the proxy pipeline and the network.
//! [`HttpOrigin`] issues the real requests: every fetch is a GET carrying
//! the loop marker and an issue timestamp, with host names resolved through
//! the pinned nameserver. The configured timeout bounds connecting, waiting
//! for the response headers and every idle gap while the body streams; a
//! body that keeps arriving may take as long as it needs.

use crate::config::TentaConfig;
use crate::error::{Result, TentaError};
use crate::resolver::PinnedResolver;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::{HeaderMap, StatusCode};
use reqwest::Client;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Header marking requests issued by this proxy
pub const LOOP_MARKER_HEADER: &str = "tenta-proxy";

/// Value of the loop marker header
pub const LOOP_MARKER_VALUE: &str = "true";

/// Header carrying the unix time an upstream request was issued
pub const TIMESTAMP_HEADER: &str = "request-timestamp";

/// Streamed upstream response body
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Response received from the origin
pub struct OriginResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl std::fmt::Debug for OriginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Source of upstream responses
#[async_trait]
pub trait Origin: Send + Sync {
    /// Fetch `url`; non-success statuses are returned as responses, not errors
    async fn fetch(&self, url: &str, user_agent: Option<&str>) -> Result<OriginResponse>;
}

/// Origin backed by a reqwest client
pub struct HttpOrigin {
    client: Client,
    timeout: Duration,
}

impl HttpOrigin {
    /// Create an origin with the given stall timeout and optional pinned nameserver
    pub fn new(timeout: Duration, nameserver: Option<SocketAddr>) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .no_proxy();

        if let Some(addr) = nameserver {
            info!("Resolving upstream hosts via {}", addr);
            builder = builder.dns_resolver(Arc::new(PinnedResolver::new(addr)));
        }

        let client = builder
            .build()
            .map_err(|e| TentaError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpOrigin { client, timeout })
    }

    /// Create an origin from the proxy configuration
    pub fn from_config(config: &TentaConfig) -> Result<Self> {
        Self::new(config.upstream_timeout(), config.resolver_addr()?)
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn fetch(&self, url: &str, user_agent: Option<&str>) -> Result<OriginResponse> {
        debug!("Fetching {}", url);

        let mut request = self
            .client
            .get(url)
            .header(LOOP_MARKER_HEADER, LOOP_MARKER_VALUE)
            .header(TIMESTAMP_HEADER, chrono::Utc::now().timestamp().to_string());
        if let Some(ua) = user_agent {
            request = request.header(http::header::USER_AGENT, ua);
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| TentaError::Timeout(format!("no response headers from {}", url)))??;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e)));

        debug!("Upstream answered {} for {}", status, url);

        Ok(OriginResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}

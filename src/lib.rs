//! Tenta
//!
//! A forward HTTP proxy that keeps upstream responses on local disk, so that
//! repeated downloads on a local network are served without going back to
//! the origin.
//!
//! # Overview
//!
//! Every request is mapped to a cache key: the FNV-1a 64 hash, in decimal,
//! of the effective URL `scheme://host/path?query`. Requests from the Steam
//! client are keyed by path and query only, because the same depot content
//! is served from many CDN host names.
//!
//! On a hit the stored body is served from disk. On a miss the body is
//! fetched from the origin and, if the response is cacheable, streamed to
//! the client and into the store at the same time. An optional background
//! task deletes entries older than a configured age.
//!
//! # Architecture
//!
//! - [`CacheProxy`]: the per-request pipeline
//! - [`CacheStore`]: one file per entry under the cache directory
//! - [`HttpOrigin`]: upstream client with loop marker headers and a pinned DNS resolver
//! - [`EvictionScheduler`]: cron driven age-based eviction
//! - [`TentaMetrics`]: request counters and store gauges
//! - [`MetricsEndpoint`]: Prometheus `/metrics` plus the [`AdminApi`] JSON routes
//!
//! # Configuration
//!
//! ```yaml
//! data_dir: /var/cache/tenta
//! max_cache_age_hours: 720       # 30 days, 0 disables eviction
//! cron_schedule: "0 * * * *"      # hourly sweep
//! http_port: 8080
//! admin_address: "0.0.0.0:2112"
//! upstream_timeout_secs: 30
//! dns_resolver: "8.8.8.8:53"
//! ```
//!
//! See [`TentaConfig`] for every option.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tenta::{CacheProxy, CacheStore, HttpOrigin, ProxyServer, TentaConfig, TentaMetrics};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TentaConfig::from_file("tenta.yaml")?;
//! let store = Arc::new(CacheStore::open(config.data_path()).await?);
//! let metrics = Arc::new(TentaMetrics::seeded(&store.list().await?));
//! let origin = Arc::new(HttpOrigin::from_config(&config)?);
//!
//! let proxy = CacheProxy::new(store, metrics, origin);
//! ProxyServer::bind(config.listen_addr(), proxy).await?.serve().await?;
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod cache_control;
pub mod cache_key;
pub mod config;
pub mod error;
pub mod eviction;
pub mod metrics;
pub mod metrics_endpoint;
pub mod origin;
pub mod proxy;
pub mod resolver;
pub mod server;
pub mod store;
pub mod tee;
pub mod timing_metrics;

// Re-export commonly used types
pub use admin::AdminApi;
pub use cache_control::{should_cache, CacheControl};
pub use cache_key::{hash_key, RequestTarget, STEAM_USER_AGENT};
pub use config::TentaConfig;
pub use error::{Result, TentaError};
pub use eviction::{EvictionScheduler, SweepReport};
pub use metrics::{MetricsSnapshot, TentaMetrics};
pub use metrics_endpoint::MetricsEndpoint;
pub use origin::{HttpOrigin, Origin, OriginResponse};
pub use proxy::{CacheProxy, RequestContext};
pub use server::ProxyServer;
pub use store::{CacheEntry, CacheStore, WriteOutcome};
pub use timing_metrics::TimingMetrics;

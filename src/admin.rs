//! Admin JSON API
//!
//! Served next to `/metrics` on the admin listener:
//! - `GET /api/health` - uptime and store summary
//! - `GET /api/cache/stats` - request counters and hit ratio
//! - `GET /api/cache/list` - every entry with size and modification time
//! - `GET /api/cache/info` - entry size distribution
//! - `DELETE /api/cache/delete/<key>` - delete one entry
//! - `DELETE /api/cache/delete` - delete every entry

use crate::config::TentaConfig;
use crate::error::{Result, TentaError};
use crate::metrics::TentaMetrics;
use crate::store::{CacheEntry, CacheStore};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const MB: u64 = 1024 * 1024;

const DELETE_PREFIX: &str = "/api/cache/delete";

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub data_dir: String,
    pub cache_files: i64,
    pub cache_size_bytes: i64,
    pub max_cache_age_hours: u64,
    pub cron_schedule: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_ratio: f64,
    pub not_found_404: u64,
    pub server_errors_5xx: u64,
    pub other_errors: u64,
    pub file_count: i64,
    pub cache_size_bytes: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListedEntry {
    pub filename: String,
    pub size: u64,
    /// RFC 3339 modification time
    pub mod_time: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub count: usize,
    pub entries: Vec<ListedEntry>,
}

/// Entry counts by size class
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SizeDistribution {
    #[serde(rename = "small_<1mb")]
    pub small: usize,
    #[serde(rename = "medium_1-10mb")]
    pub medium: usize,
    #[serde(rename = "large_10-100mb")]
    pub large: usize,
    #[serde(rename = "huge_>100mb")]
    pub huge: usize,
}

impl SizeDistribution {
    pub fn from_entries(entries: &[CacheEntry]) -> Self {
        let mut dist = SizeDistribution::default();
        for entry in entries {
            match entry.size {
                s if s < MB => dist.small += 1,
                s if s < 10 * MB => dist.medium += 1,
                s if s < 100 * MB => dist.large += 1,
                _ => dist.huge += 1,
            }
        }
        dist
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InfoResponse {
    pub total_files: usize,
    pub size_distribution: SizeDistribution,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub status: String,
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearedResponse {
    pub status: String,
    pub deleted: usize,
    pub size_freed: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Admin API handler
pub struct AdminApi {
    store: Arc<CacheStore>,
    metrics: Arc<TentaMetrics>,
    started_at: Instant,
    max_cache_age_hours: u64,
    cron_schedule: String,
}

impl AdminApi {
    pub fn new(store: Arc<CacheStore>, metrics: Arc<TentaMetrics>, config: &TentaConfig) -> Self {
        Self {
            store,
            metrics,
            started_at: Instant::now(),
            max_cache_age_hours: config.max_cache_age_hours,
            cron_schedule: config.cron_schedule.clone(),
        }
    }

    /// Whether `path` belongs to the admin API
    pub fn matches(path: &str) -> bool {
        path.starts_with("/api/")
    }

    /// Handle an admin request; unknown paths answer 404
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let result = match (method, path.as_str()) {
            (_, p) if p == DELETE_PREFIX || p.starts_with("/api/cache/delete/") => {
                if req.method() != Method::DELETE {
                    return error_json(StatusCode::METHOD_NOT_ALLOWED, "Only DELETE method allowed");
                }
                let key = p
                    .strip_prefix(DELETE_PREFIX)
                    .unwrap_or_default()
                    .trim_start_matches('/');
                if key.is_empty() {
                    self.clear().await
                } else {
                    self.delete(key).await
                }
            }
            (Method::GET, "/api/health") => self.health(),
            (Method::GET, "/api/cache/stats") => self.stats(),
            (Method::GET, "/api/cache/list") => self.list().await,
            (Method::GET, "/api/cache/info") => self.info().await,
            (_, "/api/health" | "/api/cache/stats" | "/api/cache/list" | "/api/cache/info") => {
                return error_json(StatusCode::METHOD_NOT_ALLOWED, "Only GET method allowed");
            }
            _ => return error_json(StatusCode::NOT_FOUND, "Not found"),
        };

        result.unwrap_or_else(|e| {
            let status = StatusCode::from_u16(e.to_http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            error_json(status, &e.to_string())
        })
    }

    fn health(&self) -> Result<Response<Full<Bytes>>> {
        let stats = self.metrics.get_stats();
        json_response(
            StatusCode::OK,
            &HealthResponse {
                status: "healthy".to_string(),
                uptime_seconds: self.started_at.elapsed().as_secs(),
                data_dir: self.store.root().display().to_string(),
                cache_files: stats.files,
                cache_size_bytes: stats.size_bytes,
                max_cache_age_hours: self.max_cache_age_hours,
                cron_schedule: self.cron_schedule.clone(),
            },
        )
    }

    fn stats(&self) -> Result<Response<Full<Bytes>>> {
        let stats = self.metrics.get_stats();
        json_response(
            StatusCode::OK,
            &StatsResponse {
                total_requests: stats.requests,
                cache_hits: stats.hits,
                cache_misses: stats.misses,
                hit_ratio: stats.hit_ratio(),
                not_found_404: stats.not_found,
                server_errors_5xx: stats.server_errors,
                other_errors: stats.errors,
                file_count: stats.files,
                cache_size_bytes: stats.size_bytes,
            },
        )
    }

    async fn list(&self) -> Result<Response<Full<Bytes>>> {
        let entries: Vec<ListedEntry> = self
            .store
            .list()
            .await?
            .into_iter()
            .map(|entry| ListedEntry {
                filename: entry.key,
                size: entry.size,
                mod_time: DateTime::<Utc>::from(entry.modified_at).to_rfc3339(),
            })
            .collect();

        json_response(
            StatusCode::OK,
            &ListResponse {
                count: entries.len(),
                entries,
            },
        )
    }

    async fn info(&self) -> Result<Response<Full<Bytes>>> {
        let entries = self.store.list().await?;
        json_response(
            StatusCode::OK,
            &InfoResponse {
                total_files: entries.len(),
                size_distribution: SizeDistribution::from_entries(&entries),
            },
        )
    }

    async fn delete(&self, key: &str) -> Result<Response<Full<Bytes>>> {
        let size = self.store.delete(key).await?;
        self.metrics.record_entry_removed(size);
        info!("Deleted cache entry: {}", key);

        json_response(
            StatusCode::OK,
            &DeletedResponse {
                status: "deleted".to_string(),
                key: key.to_string(),
                size,
            },
        )
    }

    async fn clear(&self) -> Result<Response<Full<Bytes>>> {
        let mut deleted = 0;
        let mut size_freed = 0;
        for entry in self.store.list().await? {
            match self.store.delete(&entry.key).await {
                Ok(size) => {
                    self.metrics.record_entry_removed(size);
                    deleted += 1;
                    size_freed += size;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!("Error deleting {}: {}", entry.key, e),
            }
        }

        info!("Cleared entire cache: deleted {} files", deleted);
        json_response(
            StatusCode::OK,
            &ClearedResponse {
                status: "cleared".to_string(),
                deleted,
                size_freed,
            },
        )
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Result<Response<Full<Bytes>>> {
    let json = serde_json::to_string(body)
        .map_err(|e| TentaError::InternalError(format!("Failed to serialize response: {}", e)))?;

    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .header("cache-control", "no-cache, no-store, must-revalidate")
        .body(Full::new(Bytes::from(json)))
        .map_err(|e| TentaError::InternalError(format!("Failed to build response: {}", e)))
}

fn error_json(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let json = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}

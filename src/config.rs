//! Configuration management for the Tenta caching proxy

use crate::error::{Result, TentaError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the caching proxy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TentaConfig {
    /// Directory holding one file per cache entry (default: ./data)
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Maximum age of a cache entry in hours; 0 disables eviction (default: 0)
    #[serde(default)]
    pub max_cache_age_hours: u64,

    /// Cron expression for the eviction sweep (default: hourly)
    /// Both 5-field and 6-field (with seconds) expressions are accepted.
    #[serde(default = "default_cron_schedule")]
    pub cron_schedule: String,

    /// Port the proxy listens on (default: 8080)
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Address of the metrics and admin API listener (default: 0.0.0.0:2112)
    #[serde(default = "default_admin_address")]
    pub admin_address: String,

    /// Upstream stall timeout in seconds (default: 30)
    /// Bounds connecting, waiting for response headers and each idle gap in
    /// the body; a steadily streaming download is never cut off.
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,

    /// Largest declared body that will be written to the store (default: 10GB)
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,

    /// Nameserver used to resolve upstream hosts (default: 8.8.8.8:53)
    /// `None` falls back to the system resolver.
    #[serde(default = "default_dns_resolver")]
    pub dns_resolver: Option<String>,

    /// Enable debug logging (default: false)
    #[serde(default)]
    pub debug: bool,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_cron_schedule() -> String {
    "0 * * * *".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_admin_address() -> String {
    "0.0.0.0:2112".to_string()
}

fn default_upstream_timeout() -> u64 {
    30
}

fn default_max_object_size() -> u64 {
    10 * 1024 * 1024 * 1024 // 10GB
}

fn default_dns_resolver() -> Option<String> {
    Some("8.8.8.8:53".to_string())
}

impl Default for TentaConfig {
    fn default() -> Self {
        TentaConfig {
            data_dir: default_data_dir(),
            max_cache_age_hours: 0,
            cron_schedule: default_cron_schedule(),
            http_port: default_http_port(),
            admin_address: default_admin_address(),
            upstream_timeout_secs: default_upstream_timeout(),
            max_object_size: default_max_object_size(),
            dns_resolver: default_dns_resolver(),
            debug: false,
        }
    }
}

impl TentaConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(TentaConfig)` if loading and validation succeed
    /// * `Err(TentaError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            TentaError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: TentaConfig = serde_yaml::from_str(content).map_err(|e| {
            TentaError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - data_dir must not be empty
    /// - upstream_timeout_secs must be > 0
    /// - max_object_size must be > 0
    /// - cron_schedule must parse when eviction is enabled
    /// - admin_address and dns_resolver must be socket addresses
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.trim().is_empty() {
            return Err(TentaError::ConfigError(
                "data_dir must not be empty".to_string(),
            ));
        }

        if self.upstream_timeout_secs == 0 {
            return Err(TentaError::ConfigError(
                "upstream_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.max_object_size == 0 {
            return Err(TentaError::ConfigError(
                "max_object_size must be greater than 0".to_string(),
            ));
        }

        if self.max_cache_age_hours > 0 {
            self.schedule()?;
        }

        self.admin_addr()?;
        self.resolver_addr()?;

        Ok(())
    }

    /// Root directory of the cache store
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    /// Upstream fetch timeout
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    /// Maximum entry age, or `None` when eviction is disabled
    pub fn max_cache_age(&self) -> Option<Duration> {
        if self.max_cache_age_hours == 0 {
            None
        } else {
            Some(Duration::from_secs(self.max_cache_age_hours * 3600))
        }
    }

    /// Address the proxy listener binds to
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.http_port))
    }

    /// Address the metrics/admin listener binds to
    pub fn admin_addr(&self) -> Result<SocketAddr> {
        self.admin_address.parse().map_err(|e| {
            TentaError::ConfigError(format!(
                "Invalid admin_address '{}': {}",
                self.admin_address, e
            ))
        })
    }

    /// Pinned nameserver address, if configured
    pub fn resolver_addr(&self) -> Result<Option<SocketAddr>> {
        match &self.dns_resolver {
            None => Ok(None),
            Some(addr) => addr.parse().map(Some).map_err(|e| {
                TentaError::ConfigError(format!("Invalid dns_resolver '{}': {}", addr, e))
            }),
        }
    }

    /// Parsed eviction schedule
    pub fn schedule(&self) -> Result<cron::Schedule> {
        parse_schedule(&self.cron_schedule)
    }
}

/// Parse a cron expression, accepting the classic 5-field form
///
/// The `cron` crate expects a leading seconds field, so 5-field expressions
/// are run at second 0.
pub fn parse_schedule(expression: &str) -> Result<cron::Schedule> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };

    cron::Schedule::from_str(&normalized).map_err(|e| {
        TentaError::ConfigError(format!("Invalid cron_schedule '{}': {}", expression, e))
    })
}

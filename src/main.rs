//! Tenta caching proxy server
//!
//! Loads configuration, sets up logging, seeds the metrics from the cache
//! directory and runs the proxy, metrics and eviction tasks until SIGINT or
//! SIGTERM.

use anyhow::Context;
use clap::Parser;
use prometheus::Registry;
use std::path::PathBuf;
use std::sync::Arc;
use tenta::{
    AdminApi, CacheProxy, CacheStore, EvictionScheduler, HttpOrigin, MetricsEndpoint,
    ProxyServer, TentaConfig, TentaMetrics, TimingMetrics,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "tenta",
    version,
    about = "Forward HTTP proxy that caches upstream responses on local disk"
)]
struct Args {
    /// Configuration file path (built-in defaults when absent)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cache directory
    #[arg(long)]
    data_dir: Option<String>,

    /// Maximum cache age in hours, 0 disables eviction
    #[arg(long)]
    max_cache_age: Option<u64>,

    /// Cron expression for the eviction sweep
    #[arg(long)]
    cron: Option<String>,

    /// Proxy listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<TentaConfig> {
        let mut config = match &self.config {
            Some(path) => TentaConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => TentaConfig::default(),
        };

        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(hours) = self.max_cache_age {
            config.max_cache_age_hours = hours;
        }
        if let Some(cron) = &self.cron {
            config.cron_schedule = cron.clone();
        }
        if let Some(port) = self.port {
            config.http_port = port;
        }
        config.debug |= self.debug;

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if config.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Tenta caching proxy");
    info!("  - Cache directory: {}", config.data_dir);
    info!("  - Max cache age: {} hours", config.max_cache_age_hours);
    info!("  - Eviction schedule: {}", config.cron_schedule);
    info!("  - Upstream timeout: {} seconds", config.upstream_timeout_secs);
    info!("  - DNS resolver: {}", config.dns_resolver.as_deref().unwrap_or("system"));

    let store = Arc::new(
        CacheStore::open(config.data_path())
            .await
            .context("Failed to open cache directory")?,
    );
    let entries = store.list().await.context("Failed to read cache directory")?;
    let metrics = Arc::new(TentaMetrics::seeded(&entries));
    info!(
        "Found {} cached files ({} bytes)",
        metrics.files(),
        metrics.size_bytes()
    );

    let registry = Registry::new();
    let timing = Arc::new(TimingMetrics::with_registry(&registry)?);

    let origin = Arc::new(HttpOrigin::from_config(&config)?);
    let proxy = CacheProxy::new(Arc::clone(&store), Arc::clone(&metrics), origin)
        .with_max_object_size(config.max_object_size)
        .with_timing_metrics(Arc::clone(&timing));

    let admin = AdminApi::new(Arc::clone(&store), Arc::clone(&metrics), &config);
    let endpoint = MetricsEndpoint::bind(config.admin_addr()?, Arc::clone(&metrics), registry, admin)
        .await
        .with_context(|| format!("Failed to bind metrics endpoint on {}", config.admin_address))?;
    let endpoint_task = tokio::spawn(async move {
        if let Err(e) = endpoint.serve().await {
            error!("Metrics endpoint failed: {}", e);
        }
    });

    let eviction_task = match EvictionScheduler::from_config(&config, Arc::clone(&store), Arc::clone(&metrics))? {
        Some(scheduler) => Some(scheduler.with_timing_metrics(timing).spawn()),
        None => {
            info!("Eviction disabled");
            None
        }
    };

    let server = ProxyServer::bind(config.listen_addr(), proxy)
        .await
        .with_context(|| format!("Failed to bind proxy on {}", config.listen_addr()))?;

    tokio::select! {
        result = server.serve() => {
            result.context("Proxy server failed")?;
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping");
        }
    }

    if let Some(task) = eviction_task {
        task.abort();
    }
    endpoint_task.abort();
    info!("Tenta stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

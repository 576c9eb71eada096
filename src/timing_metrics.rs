//! Prometheus metrics for upstream fetches and eviction sweeps

use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounter, Opts, Registry};
use std::time::Duration;

const FETCH_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Latency and eviction metrics registered in a dedicated registry
#[derive(Clone)]
pub struct TimingMetrics {
    /// Time until the upstream response headers arrived, by outcome
    pub upstream_fetch_seconds: HistogramVec,

    /// Duration of eviction sweeps
    pub eviction_sweep_seconds: Histogram,

    /// Entries removed by eviction
    pub evicted_entries_total: IntCounter,

    /// Entries eviction failed to remove
    pub eviction_failures_total: IntCounter,
}

impl TimingMetrics {
    /// Create metrics registered in `registry`
    pub fn with_registry(registry: &Registry) -> Result<Self, prometheus::Error> {
        let upstream_fetch_seconds = HistogramVec::new(
            HistogramOpts::new(
                "tenta_upstream_fetch_seconds",
                "Time until upstream response headers were received",
            )
            .buckets(FETCH_BUCKETS.to_vec()),
            &["outcome"], // outcome: ok, error
        )?;
        registry.register(Box::new(upstream_fetch_seconds.clone()))?;

        let eviction_sweep_seconds = Histogram::with_opts(HistogramOpts::new(
            "tenta_eviction_sweep_seconds",
            "Duration of eviction sweeps",
        ))?;
        registry.register(Box::new(eviction_sweep_seconds.clone()))?;

        let evicted_entries_total = IntCounter::with_opts(Opts::new(
            "tenta_evicted_entries_total",
            "Total number of cache entries removed by eviction",
        ))?;
        registry.register(Box::new(evicted_entries_total.clone()))?;

        let eviction_failures_total = IntCounter::with_opts(Opts::new(
            "tenta_eviction_failures_total",
            "Total number of cache entries eviction failed to remove",
        ))?;
        registry.register(Box::new(eviction_failures_total.clone()))?;

        Ok(Self {
            upstream_fetch_seconds,
            eviction_sweep_seconds,
            evicted_entries_total,
            eviction_failures_total,
        })
    }

    /// Record an upstream fetch
    pub fn record_fetch(&self, success: bool, duration: Duration) {
        let outcome = if success { "ok" } else { "error" };
        self.upstream_fetch_seconds
            .with_label_values(&[outcome])
            .observe(duration.as_secs_f64());
    }

    /// Record a completed eviction sweep
    pub fn record_sweep(&self, evicted: usize, failures: usize, duration: Duration) {
        self.eviction_sweep_seconds.observe(duration.as_secs_f64());
        self.evicted_entries_total.inc_by(evicted as u64);
        self.eviction_failures_total.inc_by(failures as u64);
    }
}

/// Render every metric in `registry` in the Prometheus text format
pub fn encode_registry(registry: &Registry) -> Result<String, prometheus::Error> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

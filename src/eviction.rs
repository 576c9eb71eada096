//! Age-based eviction
//!
//! A background task wakes up on a cron schedule, lists the store and
//! deletes every entry older than the configured maximum age. Deletions take
//! no lock; a request reading an entry that is deleted under it sees a
//! not-found error like any other missing entry.

use crate::config::TentaConfig;
use crate::error::Result;
use crate::metrics::TentaMetrics;
use crate::store::CacheStore;
use crate::timing_metrics::TimingMetrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

/// Result of one eviction sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries examined
    pub scanned: usize,
    /// Entries removed
    pub evicted: usize,
    /// Bytes freed by the removed entries
    pub bytes_freed: u64,
    /// Expired entries that could not be removed
    pub failures: usize,
}

/// Periodic eviction of expired entries
pub struct EvictionScheduler {
    store: Arc<CacheStore>,
    metrics: Arc<TentaMetrics>,
    timing: Option<Arc<TimingMetrics>>,
    max_age: Duration,
    schedule: cron::Schedule,
}

impl EvictionScheduler {
    pub fn new(
        store: Arc<CacheStore>,
        metrics: Arc<TentaMetrics>,
        max_age: Duration,
        schedule: cron::Schedule,
    ) -> Self {
        EvictionScheduler {
            store,
            metrics,
            timing: None,
            max_age,
            schedule,
        }
    }

    /// Build the scheduler from configuration
    ///
    /// Returns `None` when eviction is disabled (`max_cache_age_hours: 0`).
    pub fn from_config(
        config: &TentaConfig,
        store: Arc<CacheStore>,
        metrics: Arc<TentaMetrics>,
    ) -> Result<Option<Self>> {
        let max_age = match config.max_cache_age() {
            Some(age) => age,
            None => return Ok(None),
        };
        Ok(Some(Self::new(store, metrics, max_age, config.schedule()?)))
    }

    /// Record sweep durations and eviction counts
    pub fn with_timing_metrics(mut self, timing: Arc<TimingMetrics>) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Maximum entry age
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Next time the sweep fires after `after`
    pub fn next_run(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Run one sweep now
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(SystemTime::now()).await
    }

    /// Run one sweep treating `now` as the current time
    ///
    /// An entry is expired when `now - modified_at` exceeds the maximum age.
    /// Entries that already vanished are skipped silently; other deletion
    /// failures are logged and counted without stopping the sweep.
    pub async fn sweep_at(&self, now: SystemTime) -> Result<SweepReport> {
        let started = Instant::now();
        let entries = self.store.list().await?;
        let mut report = SweepReport {
            scanned: entries.len(),
            ..SweepReport::default()
        };

        for entry in entries {
            let age = match now.duration_since(entry.modified_at) {
                Ok(age) => age,
                Err(_) => continue, // modified in the future
            };
            if age <= self.max_age {
                continue;
            }

            debug!("Evicting {} (age {}s)", entry.key, age.as_secs());
            match self.store.delete(&entry.key).await {
                Ok(freed) => {
                    self.metrics.record_entry_removed(freed);
                    report.evicted += 1;
                    report.bytes_freed += freed;
                }
                Err(e) if e.is_not_found() => {
                    debug!("Cache file {} already gone", entry.key);
                }
                Err(e) => {
                    warn!("Failed to evict {}: {}", entry.key, e);
                    report.failures += 1;
                }
            }
        }

        if let Some(timing) = &self.timing {
            timing.record_sweep(report.evicted, report.failures, started.elapsed());
        }
        Ok(report)
    }

    /// Spawn the recurring sweep task
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Eviction enabled: max age {}h, schedule '{}'",
                self.max_age.as_secs() / 3600,
                self.schedule
            );

            loop {
                let now = Utc::now();
                let next = match self.next_run(now) {
                    Some(next) => next,
                    None => {
                        warn!("Eviction schedule has no upcoming runs, stopping");
                        return;
                    }
                };
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                debug!("Next eviction sweep at {}", next);
                tokio::time::sleep(wait).await;

                info!("Starting cache eviction sweep");
                match self.sweep().await {
                    Ok(report) => info!(
                        "Eviction sweep completed: scanned={}, evicted={}, freed={} bytes, failures={}",
                        report.scanned, report.evicted, report.bytes_freed, report.failures
                    ),
                    Err(e) => error!("Eviction sweep failed: {}", e),
                }
            }
        })
    }
}

//! Metrics collection for the caching proxy
//!
//! Counters only ever grow; the file and byte gauges move both ways as
//! entries are written, deleted and evicted. Every operation is a single
//! atomic instruction so request handlers and the eviction task never
//! contend on a lock.

use crate::store::CacheEntry;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Metrics collector shared by the proxy, the eviction task and the admin API
#[derive(Debug, Default)]
pub struct TentaMetrics {
    // Request statistics
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,

    // Failure statistics
    errors: AtomicU64,
    not_found: AtomicU64,
    server_errors: AtomicU64,

    // Store gauges
    files: AtomicI64,
    size_bytes: AtomicI64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub not_found: u64,
    pub server_errors: u64,
    pub files: i64,
    pub size_bytes: i64,
}

impl TentaMetrics {
    /// Create a new metrics collector with everything at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a collector whose gauges reflect existing store contents
    pub fn seeded(entries: &[CacheEntry]) -> Self {
        let metrics = Self::new();
        metrics.seed(entries);
        metrics
    }

    /// Set the file and byte gauges from a full store listing
    pub fn seed(&self, entries: &[CacheEntry]) {
        let total: u64 = entries.iter().map(|e| e.size).sum();
        self.files.store(entries.len() as i64, Ordering::Relaxed);
        self.size_bytes.store(total as i64, Ordering::Relaxed);
    }

    pub fn inc_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_hits(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_misses(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_server_errors(&self) {
        self.server_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a new entry of `size` bytes in the store
    pub fn record_entry_added(&self, size: u64) {
        self.files.fetch_add(1, Ordering::Relaxed);
        self.size_bytes.fetch_add(size as i64, Ordering::Relaxed);
    }

    /// Record removal of an entry of `size` bytes from the store
    pub fn record_entry_removed(&self, size: u64) {
        self.files.fetch_sub(1, Ordering::Relaxed);
        self.size_bytes.fetch_sub(size as i64, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn not_found(&self) -> u64 {
        self.not_found.load(Ordering::Relaxed)
    }

    pub fn server_errors(&self) -> u64 {
        self.server_errors.load(Ordering::Relaxed)
    }

    pub fn files(&self) -> i64 {
        self.files.load(Ordering::Relaxed)
    }

    pub fn size_bytes(&self) -> i64 {
        self.size_bytes.load(Ordering::Relaxed)
    }

    /// Get a snapshot of current metrics
    ///
    /// Fields are loaded one at a time, so a snapshot taken under load may
    /// not be perfectly consistent across fields.
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests(),
            hits: self.hits(),
            misses: self.misses(),
            errors: self.errors(),
            not_found: self.not_found(),
            server_errors: self.server_errors(),
            files: self.files(),
            size_bytes: self.size_bytes(),
        }
    }
}

impl MetricsSnapshot {
    /// Fraction of all requests served from the store (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::SystemTime;

    fn entry(key: &str, size: u64) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            size,
            modified_at: SystemTime::now(),
        }
    }

    #[test]
    fn test_counters() {
        let metrics = TentaMetrics::new();

        metrics.inc_requests();
        metrics.inc_requests();
        metrics.inc_hits();
        metrics.inc_misses();
        metrics.inc_errors();
        metrics.inc_not_found();
        metrics.inc_server_errors();

        let stats = metrics.get_stats();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.not_found, 1);
        assert_eq!(stats.server_errors, 1);
    }

    #[test]
    fn test_gauges_move_both_ways() {
        let metrics = TentaMetrics::new();

        metrics.record_entry_added(100);
        metrics.record_entry_added(50);
        metrics.record_entry_removed(100);

        assert_eq!(metrics.files(), 1);
        assert_eq!(metrics.size_bytes(), 50);
    }

    #[test]
    fn test_seeded_from_listing() {
        let metrics = TentaMetrics::seeded(&[entry("1", 10), entry("2", 32)]);
        assert_eq!(metrics.files(), 2);
        assert_eq!(metrics.size_bytes(), 42);
        assert_eq!(metrics.requests(), 0);
    }

    #[test]
    fn test_hit_ratio() {
        let metrics = TentaMetrics::new();
        assert_eq!(metrics.get_stats().hit_ratio(), 0.0);

        for _ in 0..4 {
            metrics.inc_requests();
        }
        metrics.inc_hits();
        assert_eq!(metrics.get_stats().hit_ratio(), 0.25);
    }

    #[test]
    fn test_thread_safety() {
        let metrics = Arc::new(TentaMetrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let metrics_clone = Arc::clone(&metrics);
            let handle = thread::spawn(move || {
                for _ in 0..100 {
                    metrics_clone.inc_requests();
                    metrics_clone.record_entry_added(3);
                    metrics_clone.record_entry_removed(1);
                }
            });
            handles.push(handle);
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = metrics.get_stats();
        assert_eq!(stats.requests, 1000);
        assert_eq!(stats.files, 0);
        assert_eq!(stats.size_bytes, 2000);
    }
}

//! Integration tests for age-based eviction

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tenta::config::parse_schedule;
use tenta::{CacheStore, EvictionScheduler, TentaConfig, TentaMetrics, TimingMetrics};

const HOUR: Duration = Duration::from_secs(3600);

fn write_entry(dir: &Path, key: &str, size: usize, age: Duration) {
    let path = dir.join(key);
    std::fs::write(&path, vec![1u8; size]).unwrap();
    std::fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(SystemTime::now() - age)
        .unwrap();
}

#[tokio::test]
async fn test_sweep_updates_gauges_by_freed_entries() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    write_entry(temp_dir.path(), "100", 10, 30 * HOUR);
    write_entry(temp_dir.path(), "200", 20, 25 * HOUR);
    write_entry(temp_dir.path(), "300", 40, 2 * HOUR);
    write_entry(temp_dir.path(), "400", 80, Duration::ZERO);

    let store = Arc::new(CacheStore::open(temp_dir.path()).await.unwrap());
    let metrics = Arc::new(TentaMetrics::seeded(&store.list().await.unwrap()));
    assert_eq!(metrics.files(), 4);
    assert_eq!(metrics.size_bytes(), 150);

    let config = TentaConfig {
        data_dir: temp_dir.path().display().to_string(),
        max_cache_age_hours: 24,
        ..TentaConfig::default()
    };
    let scheduler = EvictionScheduler::from_config(&config, Arc::clone(&store), Arc::clone(&metrics))
        .unwrap()
        .expect("eviction should be enabled");

    let report = scheduler.sweep().await.unwrap();
    assert_eq!(report.scanned, 4);
    assert_eq!(report.evicted, 2);
    assert_eq!(report.bytes_freed, 30);

    assert_eq!(metrics.files(), 2);
    assert_eq!(metrics.size_bytes(), 120);

    let mut remaining: Vec<String> = store.list().await.unwrap().into_iter().map(|e| e.key).collect();
    remaining.sort();
    assert_eq!(remaining, vec!["300".to_string(), "400".to_string()]);
}

#[tokio::test]
async fn test_sweep_at_uses_given_clock() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    write_entry(temp_dir.path(), "1", 5, Duration::ZERO);

    let store = Arc::new(CacheStore::open(temp_dir.path()).await.unwrap());
    let metrics = Arc::new(TentaMetrics::seeded(&store.list().await.unwrap()));
    let scheduler = EvictionScheduler::new(
        Arc::clone(&store),
        Arc::clone(&metrics),
        HOUR,
        parse_schedule("*/5 * * * *").unwrap(),
    );

    let report = scheduler.sweep_at(SystemTime::now() + 2 * HOUR).await.unwrap();
    assert_eq!(report.evicted, 1);
    assert_eq!(metrics.files(), 0);
    assert_eq!(metrics.size_bytes(), 0);
}

#[tokio::test]
async fn test_sweep_records_timing_metrics() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    write_entry(temp_dir.path(), "1", 5, 3 * HOUR);

    let store = Arc::new(CacheStore::open(temp_dir.path()).await.unwrap());
    let registry = prometheus::Registry::new();
    let timing = Arc::new(TimingMetrics::with_registry(&registry).unwrap());
    let scheduler = EvictionScheduler::new(
        store,
        Arc::new(TentaMetrics::new()),
        HOUR,
        parse_schedule("0 * * * *").unwrap(),
    )
    .with_timing_metrics(Arc::clone(&timing));

    scheduler.sweep().await.unwrap();
    assert_eq!(timing.evicted_entries_total.get(), 1);
    assert_eq!(timing.eviction_sweep_seconds.get_sample_count(), 1);
}

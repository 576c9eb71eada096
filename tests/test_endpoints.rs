//! End-to-end tests over real sockets: proxy listener, metrics endpoint and admin API

use std::sync::Arc;
use std::time::Duration;
use tenta::{
    AdminApi, CacheProxy, CacheStore, HttpOrigin, MetricsEndpoint, ProxyServer, TentaConfig,
    TentaMetrics, TimingMetrics,
};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    proxy_addr: std::net::SocketAddr,
    admin_addr: std::net::SocketAddr,
    metrics: Arc<TentaMetrics>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    _temp_dir: tempfile::TempDir,
}

impl Drop for Harness {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn start() -> Harness {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let config = TentaConfig {
        data_dir: temp_dir.path().display().to_string(),
        admin_address: "127.0.0.1:0".to_string(),
        dns_resolver: None,
        ..TentaConfig::default()
    };

    let store = Arc::new(CacheStore::open(config.data_path()).await.unwrap());
    let metrics = Arc::new(TentaMetrics::seeded(&store.list().await.unwrap()));
    let registry = prometheus::Registry::new();
    let timing = Arc::new(TimingMetrics::with_registry(&registry).unwrap());
    let origin = Arc::new(HttpOrigin::new(Duration::from_secs(5), None).unwrap());

    let proxy = CacheProxy::new(Arc::clone(&store), Arc::clone(&metrics), origin)
        .with_timing_metrics(timing);
    let server = ProxyServer::bind("127.0.0.1:0".parse().unwrap(), proxy).await.unwrap();
    let proxy_addr = server.local_addr().unwrap();

    let admin = AdminApi::new(Arc::clone(&store), Arc::clone(&metrics), &config);
    let endpoint = MetricsEndpoint::bind(config.admin_addr().unwrap(), Arc::clone(&metrics), registry, admin)
        .await
        .unwrap();
    let admin_addr = endpoint.local_addr().unwrap();

    let tasks = vec![
        tokio::spawn(async move {
            let _ = server.serve().await;
        }),
        tokio::spawn(async move {
            let _ = endpoint.serve().await;
        }),
    ];

    Harness {
        proxy_addr,
        admin_addr,
        metrics,
        tasks,
        _temp_dir: temp_dir,
    }
}

#[tokio::test]
async fn test_proxy_over_socket_and_metrics() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
        .expect(1)
        .mount(&origin)
        .await;

    let harness = start().await;
    let client = reqwest::Client::builder().no_proxy().build().unwrap();

    for _ in 0..2 {
        let body = client
            .get(format!("http://{}/file.bin", harness.proxy_addr))
            .header("host", origin.address().to_string())
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "payload");
    }
    assert_eq!(harness.metrics.hits(), 1);

    let metrics = client
        .get(format!("http://{}/metrics", harness.admin_addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("tenta_requests_received 2\n"));
    assert!(metrics.contains("tenta_hits 1\n"));
    assert!(metrics.contains("tenta_misses 1\n"));
    assert!(metrics.contains("tenta_files 1\n"));
    assert!(metrics.contains("tenta_size 7\n"));
    assert!(metrics.contains("tenta_upstream_fetch_seconds_count{outcome=\"ok\"} 1"));

    let stats = client
        .get(format!("http://{}/api/cache/stats", harness.admin_addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let stats: serde_json::Value = serde_json::from_str(&stats).unwrap();
    assert_eq!(stats["total_requests"], 2);
    assert_eq!(stats["hit_ratio"], 0.5);
}

#[tokio::test]
async fn test_admin_delete_over_socket() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("abc"))
        .mount(&origin)
        .await;

    let harness = start().await;
    let client = reqwest::Client::builder().no_proxy().build().unwrap();

    client
        .get(format!("http://{}/x", harness.proxy_addr))
        .header("host", origin.address().to_string())
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(harness.metrics.files(), 1);

    let list = client
        .get(format!("http://{}/api/cache/list", harness.admin_addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let list: serde_json::Value = serde_json::from_str(&list).unwrap();
    assert_eq!(list["count"], 1);
    let key = list["entries"][0]["filename"].as_str().unwrap().to_string();

    let response = client
        .delete(format!("http://{}/api/cache/delete/{}", harness.admin_addr, key))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(harness.metrics.files(), 0);
    assert_eq!(harness.metrics.size_bytes(), 0);

    let response = client
        .get(format!("http://{}/unknown", harness.admin_addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

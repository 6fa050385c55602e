//! Integration tests for the Twitter Server exporter.
//!
//! These tests run a fake Twitter Server admin endpoint on localhost and
//! verify the full flow from fetching `metrics.json` to exposing it via the
//! HTTP /metrics endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::watch;

use twitterserver_exporter::config::SourceConfig;
use twitterserver_exporter::{Exporter, ExporterConfig, HttpServer};

/// Fake Twitter Server admin endpoint.
#[derive(Clone)]
struct FakeServer {
    snapshot: Arc<Value>,
    /// Requests with a zero-based index listed here get a 500.
    fail_on: Arc<Vec<usize>>,
    requests: Arc<AtomicUsize>,
}

async fn metrics_json(State(server): State<FakeServer>) -> Response {
    let n = server.requests.fetch_add(1, Ordering::SeqCst);
    if server.fail_on.contains(&n) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    axum::Json(server.snapshot.as_ref().clone()).into_response()
}

async fn not_json() -> Response {
    (StatusCode::OK, "<html>not json</html>").into_response()
}

async fn json_array() -> Response {
    axum::Json(json!([1, 2, 3])).into_response()
}

/// Start a fake source and return its base URL.
async fn start_source(snapshot: Value, fail_on: Vec<usize>) -> (String, Arc<AtomicUsize>) {
    let requests = Arc::new(AtomicUsize::new(0));
    let server = FakeServer {
        snapshot: Arc::new(snapshot),
        fail_on: Arc::new(fail_on),
        requests: requests.clone(),
    };

    let router = Router::new()
        .route("/admin/metrics.json", get(metrics_json))
        .route("/broken.json", get(not_json))
        .route("/array.json", get(json_array))
        .with_state(server);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    (format!("http://{}", addr), requests)
}

fn create_exporter(url: String) -> Exporter {
    let config = ExporterConfig {
        source: SourceConfig {
            url,
            connect_timeout_secs: 2,
            response_timeout_secs: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    config.validate().unwrap();
    Exporter::from_config(&config).unwrap()
}

/// Extract `(series, value)` pairs, skipping comments.
fn samples(output: &str) -> Vec<(&str, f64)> {
    output
        .lines()
        .filter(|l| !l.starts_with('#') && !l.trim().is_empty())
        .filter_map(|l| {
            let (series, value) = l.rsplit_once(' ')?;
            Some((series, value.parse().ok()?))
        })
        .collect()
}

fn value_of(output: &str, series: &str) -> Option<f64> {
    samples(output)
        .into_iter()
        .find(|(s, _)| *s == series)
        .map(|(_, v)| v)
}

#[tokio::test]
async fn test_end_to_end_snapshot() {
    let (base, _) = start_source(
        json!({
            "requests_p99": 12.5,
            "requests_avg": 3.2,
            "errors total": 4,
            "status": "ok"
        }),
        vec![],
    )
    .await;
    let exporter = create_exporter(format!("{}/admin/metrics.json", base));

    let output = exporter.render().await;

    assert_eq!(
        value_of(&output, "twitterserver_requests{bucket=\"p99\"}"),
        Some(12.5)
    );
    assert_eq!(
        value_of(&output, "twitterserver_requests{bucket=\"avg\"}"),
        Some(3.2)
    );
    assert_eq!(value_of(&output, "twitterserver_errors_total"), Some(4.0));
    assert!(!output.contains("status"), "Non-numeric stats must be dropped");
    assert_eq!(
        value_of(&output, "twitterserver_exporter_scrape_errors_total"),
        Some(0.0)
    );
    assert!(value_of(&output, "twitterserver_exporter_last_scrape_duration_seconds").is_some());
}

#[tokio::test]
async fn test_realistic_twitter_server_snapshot() {
    let (base, _) = start_source(
        json!({
            "jvm/uptime": 3600000,
            "jvm/mem/current/used": 104857600,
            "srv/http/requests": 1024,
            "srv/http/request_latency_ms.count": 512,
            "srv/http/request_latency_ms.p50": 3,
            "srv/http/request_latency_ms.p9999": 250,
            "srv/http/request_latency_ms.stddev": 4.5,
            "clnt/redis/loadbalancer/size": 3,
            "toggles/version": "1.0.0",
            "admin/enabled": true,
            "histograms": { "p50": 1 },
            "leader": null
        }),
        vec![],
    )
    .await;
    let exporter = create_exporter(format!("{}/admin/metrics.json", base));

    let output = exporter.render().await;

    assert_eq!(value_of(&output, "twitterserver_jvm_uptime"), Some(3_600_000.0));
    assert_eq!(
        value_of(&output, "twitterserver_jvm_mem_current_used"),
        Some(104_857_600.0)
    );
    assert_eq!(
        value_of(&output, "twitterserver_srv_http_request_latency_ms{bucket=\"count\"}"),
        Some(512.0)
    );
    assert_eq!(
        value_of(&output, "twitterserver_srv_http_request_latency_ms{bucket=\"p9999\"}"),
        Some(250.0)
    );
    assert_eq!(
        value_of(&output, "twitterserver_srv_http_request_latency_ms{bucket=\"stddev\"}"),
        Some(4.5)
    );

    // Sanitized names only contain valid characters
    for (series, _) in samples(&output) {
        let name = series.split('{').next().unwrap();
        assert!(
            name.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':'),
            "Metric name '{}' contains invalid characters",
            name
        );
    }

    // Non-numeric values are dropped without counting as errors
    assert!(!output.contains("toggles"));
    assert!(!output.contains("admin_enabled"));
    assert!(!output.contains("histograms"));
    assert!(!output.contains("leader"));
    assert_eq!(exporter.stats().errors_total(), 0);

    let type_lines = output
        .lines()
        .filter(|l| l.starts_with("# TYPE twitterserver_srv_http_request_latency_ms "))
        .count();
    assert_eq!(type_lines, 1);
}

#[tokio::test]
async fn test_source_errors_are_counted_and_recover() {
    let (base, requests) = start_source(json!({ "uptime": 5 }), vec![0, 2]).await;
    let exporter = create_exporter(format!("{}/admin/metrics.json", base));

    let output = exporter.render().await;
    assert_eq!(value_of(&output, "twitterserver_uptime"), None);
    assert_eq!(
        value_of(&output, "twitterserver_exporter_scrape_errors_total"),
        Some(1.0)
    );

    let output = exporter.render().await;
    assert_eq!(value_of(&output, "twitterserver_uptime"), Some(5.0));
    assert_eq!(
        value_of(&output, "twitterserver_exporter_scrape_errors_total"),
        Some(1.0)
    );

    let output = exporter.render().await;
    assert_eq!(
        value_of(&output, "twitterserver_exporter_scrape_errors_total"),
        Some(2.0)
    );

    assert_eq!(requests.load(Ordering::SeqCst), 3, "One fetch per scrape, no retries");
}

#[tokio::test]
async fn test_malformed_json_counts_as_error() {
    let (base, _) = start_source(json!({}), vec![]).await;

    let exporter = create_exporter(format!("{}/broken.json", base));
    exporter.render().await;
    assert_eq!(exporter.stats().errors_total(), 1);

    let exporter = create_exporter(format!("{}/array.json", base));
    exporter.render().await;
    assert_eq!(exporter.stats().errors_total(), 1);
}

#[tokio::test]
async fn test_unreachable_source() {
    // Grab a free port and release it so nothing is listening there
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let exporter = create_exporter(format!("http://{}/admin/metrics.json", addr));

    let output = exporter.render().await;
    assert_eq!(
        value_of(&output, "twitterserver_exporter_scrape_errors_total"),
        Some(1.0)
    );
    assert!(exporter.stats().last_duration_secs() >= 0.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_scrapes_each_fetch_once() {
    let (base, requests) = start_source(json!({ "requests_p50": 2 }), vec![]).await;
    let exporter = Arc::new(create_exporter(format!("{}/admin/metrics.json", base)));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let exporter = exporter.clone();
            tokio::spawn(async move { exporter.render().await })
        })
        .collect();

    for handle in handles {
        let output = handle.await.unwrap();
        assert_eq!(
            value_of(&output, "twitterserver_requests{bucket=\"p50\"}"),
            Some(2.0)
        );
    }

    assert_eq!(requests.load(Ordering::SeqCst), 10);
    assert_eq!(exporter.stats().errors_total(), 0);
}

#[tokio::test]
async fn test_http_server_metrics_endpoint() {
    let (base, _) = start_source(json!({ "srv/http/requests": 42 }), vec![]).await;
    let exporter = Arc::new(create_exporter(format!("{}/admin/metrics.json", base)));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = HttpServer::new(exporter, addr, "/metrics".to_string());
    let server_handle = tokio::spawn(server.serve(listener, shutdown_rx));

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let response = client
        .get(format!("http://{}/metrics", addr))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain; version=0.0.4"));
    let body = response.text().await.unwrap();
    assert!(body.contains("twitterserver_srv_http_requests 42"));

    let response = client
        .get(format!("http://{}/", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 301);
    assert_eq!(response.headers()["location"], "/metrics");

    drop(client);
    let _ = shutdown_tx.send(true);
    let result = tokio::time::timeout(Duration::from_secs(5), server_handle)
        .await
        .expect("server did not shut down")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_http_server_bind_failure() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = occupied.local_addr().unwrap();

    let exporter = Arc::new(create_exporter("http://127.0.0.1:1/metrics.json".to_string()));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let result = HttpServer::new(exporter, addr, "/metrics".to_string())
        .run(shutdown_rx)
        .await;

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("Failed to bind"));
}

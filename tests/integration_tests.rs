// Integration tests: monitoring HTTP endpoints

mod common;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use common::*;
use opswatch::alerts::AlertEngine;
use opswatch::alerts::notify::Notifier;
use opswatch::cache::CacheManager;
use opswatch::collector::{CollectorConfig, MetricsCollector};
use opswatch::config::AppConfig;
use opswatch::models::*;
use opswatch::routes;
use std::sync::Arc;

const TEST_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"

[monitoring]
sample_interval_ms = 1000
stats_log_interval_secs = 60
"#;

struct TestApp {
    server: TestServer,
    collector: Arc<MetricsCollector>,
    cache: Arc<CacheManager>,
}

fn test_app() -> TestApp {
    let config = AppConfig::load_from_str(TEST_CONFIG).unwrap();
    let engine = Arc::new(AlertEngine::from_config(&config.alerts, Notifier::new()).unwrap());
    let cache = Arc::new(CacheManager::from_config(&config.caches));
    let collector = collector_with(engine, CollectorConfig::default());
    let server = TestServer::new(routes::app(collector.clone(), cache.clone()));
    TestApp {
        server,
        collector,
        cache,
    }
}

#[tokio::test]
async fn test_version_endpoint() {
    let app = test_app();
    let response = app.server.get("/version").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json["name"], "opswatch");
    assert!(json["version"].as_str().is_some());
}

#[tokio::test]
async fn test_requests_are_tracked() {
    let app = test_app();
    app.server.get("/version").await.assert_status_ok();
    app.server.get("/version").await.assert_status_ok();
    app.server.get("/api/monitor/rules").await.assert_status_ok();

    let response = app.server.get("/api/monitor/stats").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    let requests = &json["requests"];
    assert_eq!(requests["total"], 3);
    assert_eq!(requests["byMethod"]["GET"], 3);
    assert_eq!(requests["byEndpoint"]["/version"], 2);
    assert_eq!(requests["byStatusClass"]["2xx"], 3);
    assert_eq!(requests["errorRatePercent"], 0.0);
    assert_eq!(json["isMonitoring"], false);
    assert!(json["system"]["platform"].as_str().is_some());

    // The stats request itself is counted once it completes.
    assert_eq!(app.collector.stats().requests.total, 4);
}

#[tokio::test]
async fn test_route_pattern_used_for_endpoint() {
    let app = test_app();
    app.server
        .post("/api/monitor/alerts/41/acknowledge")
        .expect_failure()
        .await;
    app.server
        .post("/api/monitor/alerts/42/acknowledge")
        .expect_failure()
        .await;

    let stats = app.collector.stats().requests;
    assert_eq!(stats.by_endpoint["/api/monitor/alerts/{id}/acknowledge"], 2);
    assert_eq!(stats.by_status_class["4xx"], 2);
    assert_eq!(stats.error_rate_percent, 100.0);
}

#[tokio::test]
async fn test_alerts_endpoint_filters() {
    let app = test_app();
    let (_, fired) = app.collector.ingest(92.0, memory(40.0), None);
    assert_eq!(fired.len(), 1);

    let all: Vec<AlertEvent> = app.server.get("/api/monitor/alerts").await.json();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].alert_type, "cpu");

    let critical: Vec<AlertEvent> = app
        .server
        .get("/api/monitor/alerts")
        .add_query_param("severity", "critical")
        .await
        .json();
    assert_eq!(critical.len(), 1);

    let info: Vec<AlertEvent> = app
        .server
        .get("/api/monitor/alerts")
        .add_query_param("severity", "info")
        .await
        .json();
    assert!(info.is_empty());

    let memory_alerts: Vec<AlertEvent> = app
        .server
        .get("/api/monitor/alerts?type=memory")
        .await
        .json();
    assert!(memory_alerts.is_empty());
}

#[tokio::test]
async fn test_acknowledge_endpoint() {
    let app = test_app();
    let (_, fired) = app.collector.ingest(92.0, memory(40.0), None);
    let id = fired[0].id;

    let response = app
        .server
        .post(&format!("/api/monitor/alerts/{id}/acknowledge"))
        .add_header(
            HeaderName::from_static("x-actor-id"),
            HeaderValue::from_static("admin-7"),
        )
        .await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json["status"], "acknowledged");
    assert_eq!(json["alert"]["acknowledgedBy"], "admin-7");
    assert_eq!(json["alert"]["acknowledged"], true);

    let stats: AlertStats = app.server.get("/api/monitor/alerts/stats").await.json();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.unacknowledged, 0);
}

#[tokio::test]
async fn test_stats_include_unacknowledged_alerts() {
    let app = test_app();
    let (_, fired) = app.collector.ingest(92.0, memory(40.0), None);
    let id = fired[0].id;

    let json: serde_json::Value = app.server.get("/api/monitor/stats").await.json();
    assert_eq!(json["alerts"].as_array().unwrap().len(), 1);
    assert_eq!(json["alerts"][0]["id"], id);
    assert_eq!(json["alertStats"]["unacknowledged"], 1);

    app.collector.engine().acknowledge(id, None).unwrap();
    let json: serde_json::Value = app.server.get("/api/monitor/stats").await.json();
    assert!(json["alerts"].as_array().unwrap().is_empty());
    assert_eq!(json["alertStats"]["unacknowledged"], 0);
    assert_eq!(json["alertStats"]["total"], 1);
}

#[tokio::test]
async fn test_acknowledge_unknown_alert() {
    let app = test_app();
    let response = app
        .server
        .post("/api/monitor/alerts/999/acknowledge")
        .expect_failure()
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let json: serde_json::Value = response.json();
    assert_eq!(json["error"], "not found");
}

#[tokio::test]
async fn test_cache_endpoints() {
    let app = test_app();
    app.cache
        .set("settings:list:all", &serde_json::json!({}), None, "settings")
        .unwrap();
    app.cache.get("settings:list:all", "settings");

    let stats: CacheManagerStats = app.server.get("/api/monitor/cache").await.json();
    assert_eq!(stats.key_count, 1);
    assert_eq!(stats.hits, 1);
    let names: Vec<&str> = stats.caches.keys().map(String::as_str).collect();
    assert_eq!(names, ["default", "products", "settings"]);

    let response = app.server.post("/api/monitor/cache/flush").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json["flushed"], 1);
    assert_eq!(app.cache.stats().key_count, 0);
}

#[tokio::test]
async fn test_rules_endpoint() {
    let app = test_app();
    let rules: Vec<serde_json::Value> = app.server.get("/api/monitor/rules").await.json();
    assert_eq!(rules.len(), 6);
    assert_eq!(rules[0]["name"], "cpu");
    assert_eq!(rules[0]["cooldownMs"], 300_000);
    assert_eq!(rules[5]["enabled"], false);
}

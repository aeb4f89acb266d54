mod common;

use common::*;
use opswatch::alerts::AlertEngine;
use opswatch::alerts::notify::Notifier;
use opswatch::collector::CollectorConfig;
use opswatch::models::*;
use std::sync::Arc;
use tokio::time::{Duration, advance, sleep};

fn quiet_engine() -> Arc<AlertEngine> {
    Arc::new(AlertEngine::new(500, Notifier::new()))
}

#[tokio::test]
async fn test_request_hook_counts() {
    let collector = collector_with(quiet_engine(), CollectorConfig::default());
    collector.request_hook("GET", "/api/products", 200, 10);
    collector.request_hook("GET", "/api/products", 304, 20);
    collector.request_hook("POST", "/api/orders", 201, 30);
    collector.request_hook("GET", "/api/orders/{id}", 404, 40);

    let stats = collector.stats().requests;
    assert_eq!(stats.total, 4);
    assert_eq!(stats.by_method["GET"], 3);
    assert_eq!(stats.by_method["POST"], 1);
    assert_eq!(stats.by_endpoint["/api/products"], 2);
    assert_eq!(stats.by_status_class["2xx"], 2);
    assert_eq!(stats.by_status_class["3xx"], 1);
    assert_eq!(stats.by_status_class["4xx"], 1);
    assert_eq!(stats.average_response_time_ms, 25.0);
    assert_eq!(stats.error_rate_percent, 25.0);
}

#[tokio::test]
async fn test_empty_stats_are_zero() {
    let collector = collector_with(quiet_engine(), CollectorConfig::default());
    let stats = collector.stats();
    assert_eq!(stats.requests.total, 0);
    assert_eq!(stats.requests.error_rate_percent, 0.0);
    assert_eq!(stats.requests.average_response_time_ms, 0.0);
    assert!(stats.samples.is_empty());
    assert!(!stats.is_monitoring);
    assert!(collector.latest_sample().is_none());
}

#[tokio::test]
async fn test_error_rate_rounds_to_whole_percent() {
    let cases = [(3, 1, 33.0), (3, 2, 67.0), (7, 1, 14.0), (200, 1, 1.0), (1, 1, 100.0)];
    for (total, errors, expected) in cases {
        let collector = collector_with(quiet_engine(), CollectorConfig::default());
        for i in 0..total {
            let status = if i < errors { 500 } else { 200 };
            collector.request_hook("GET", "/", status, 1);
        }
        assert_eq!(
            collector.stats().requests.error_rate_percent,
            expected,
            "{errors} errors of {total}"
        );
    }
}

#[tokio::test]
async fn test_average_uses_only_retained_times() {
    let config = CollectorConfig {
        response_time_capacity: 3,
        ..Default::default()
    };
    let collector = collector_with(quiet_engine(), config);
    for ms in [1000, 1, 2, 3] {
        collector.request_hook("GET", "/", 200, ms);
    }
    let stats = collector.stats().requests;
    assert_eq!(stats.total, 4);
    assert_eq!(stats.average_response_time_ms, 2.0);
}

#[tokio::test(start_paused = true)]
async fn test_requests_per_minute() {
    let collector = collector_with(quiet_engine(), CollectorConfig::default());
    for _ in 0..30 {
        collector.request_hook("GET", "/", 200, 1);
    }
    assert_eq!(collector.stats().requests.requests_per_minute, 0.0);

    advance(Duration::from_secs(120)).await;
    let stats = collector.stats();
    assert_eq!(stats.requests.requests_per_minute, 15.0);
    assert_eq!(stats.uptime_ms, 120_000);
}

#[tokio::test]
async fn test_sample_buffer_is_bounded() {
    let config = CollectorConfig {
        sample_capacity: 3,
        ..Default::default()
    };
    let collector = collector_with(quiet_engine(), config);
    for cpu in [10.0, 20.0, 30.0, 40.0, 50.0] {
        collector.ingest(cpu, memory(40.0), None);
    }
    let samples = collector.stats().samples;
    let cpus: Vec<f64> = samples.iter().map(|s| s.cpu_percent).collect();
    assert_eq!(cpus, [30.0, 40.0, 50.0]);
    assert_eq!(collector.latest_sample().unwrap().cpu_percent, 50.0);
}

#[tokio::test]
async fn test_ingest_builds_snapshot() {
    let collector = collector_with(quiet_engine(), CollectorConfig::default());
    collector.request_hook("GET", "/", 200, 100);
    collector.request_hook("GET", "/", 503, 300);

    let (snapshot, fired) = collector.ingest(12.0, memory(50.0), None);
    assert!(fired.is_empty());
    assert_eq!(snapshot.cpu_percent, 12.0);
    assert_eq!(snapshot.memory_percent, 50.0);
    assert_eq!(snapshot.average_response_time_ms, 200.0);
    assert_eq!(snapshot.response_samples, 2);
    assert_eq!(snapshot.error_rate_percent, 50.0);
    assert_eq!(snapshot.total_requests, 2);
    assert_eq!(snapshot.total_errors, 1);
    assert!(snapshot.disk.is_none());

    let sample = collector.latest_sample().unwrap();
    assert_eq!(sample.memory_used_percent, 50.0);
    assert_eq!(sample.memory_total_bytes, memory(50.0).total);
}

#[tokio::test(start_paused = true)]
async fn test_ingest_drives_alert_cooldown() {
    let engine = Arc::new(cpu_engine());
    let collector = collector_with(engine.clone(), CollectorConfig::default());

    let (_, fired) = collector.ingest(92.0, memory(40.0), None);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].severity, Severity::Critical);

    advance(Duration::from_secs(10)).await;
    let (_, fired) = collector.ingest(95.0, memory(40.0), None);
    assert!(fired.is_empty());

    advance(Duration::from_secs(291)).await;
    let (_, fired) = collector.ingest(95.0, memory(40.0), None);
    assert_eq!(fired.len(), 1);
    assert_eq!(engine.stats().total, 2);
}

#[tokio::test]
async fn test_error_rate_rule_fires_from_requests() {
    let engine = Arc::new(AlertEngine::new(500, Notifier::new()));
    engine
        .add_rule("errorRate", RuleConfig::new(Metric::ErrorRate, 5.0))
        .unwrap();
    let collector = collector_with(engine, CollectorConfig::default());
    for status in [200, 200, 500, 404] {
        collector.request_hook("GET", "/", status, 5);
    }

    let (_, fired) = collector.ingest(10.0, memory(10.0), None);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].message, "Error rate high: 50%");
    assert_eq!(fired[0].metrics_snapshot["totalRequests"], "4");
    assert_eq!(fired[0].metrics_snapshot["totalErrors"], "2");
    assert_eq!(fired[0].severity, Severity::Critical);
}

#[tokio::test]
async fn test_reset_clears_everything() {
    let collector = collector_with(quiet_engine(), CollectorConfig::default());
    collector.request_hook("GET", "/", 500, 5);
    collector.ingest(10.0, memory(10.0), None);

    collector.reset();
    let stats = collector.stats();
    assert_eq!(stats.requests.total, 0);
    assert!(stats.requests.by_method.is_empty());
    assert!(stats.samples.is_empty());
}

#[tokio::test]
async fn test_save_report() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reports").join("monitor.json");
    let collector = collector_with(quiet_engine(), CollectorConfig::default());
    collector.request_hook("GET", "/", 200, 5);

    collector.save_report(&path).await.unwrap();
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(report["stats"]["requests"]["total"], 1);
    assert!(report["timestamp"].as_str().is_some());
    assert!(report["period"]["start"].as_str().is_some());
    assert!(report["period"]["durationMs"].is_u64());
}

#[tokio::test]
async fn test_start_is_idempotent_and_stop_halts_sampling() {
    let collector = collector_with(quiet_engine(), CollectorConfig::default());
    assert!(collector.start(Duration::from_millis(20)));
    assert!(!collector.start(Duration::from_millis(20)));
    assert!(collector.is_running());
    assert!(collector.stats().is_monitoring);

    sleep(Duration::from_millis(150)).await;
    collector.stop().await;
    assert!(!collector.is_running());

    let taken = collector.stats().samples.len();
    assert!(taken >= 1, "expected at least one sample, got {taken}");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(collector.stats().samples.len(), taken);

    // A stopped collector can be started again.
    assert!(collector.start(Duration::from_millis(20)));
    collector.stop().await;
}

#[tokio::test]
async fn test_stop_without_start_is_noop() {
    let collector = collector_with(quiet_engine(), CollectorConfig::default());
    collector.stop().await;
    assert!(!collector.is_running());
}

#[tokio::test]
async fn test_tick_reads_host() {
    let collector = collector_with(quiet_engine(), CollectorConfig::default());
    let snapshot = collector.tick().await.unwrap();
    assert!((0.0..=100.0).contains(&snapshot.cpu_percent));
    assert!(snapshot.memory_total_bytes > 0);
    assert_eq!(collector.stats().samples.len(), 1);
}

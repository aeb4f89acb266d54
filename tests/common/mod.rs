// Shared test helpers
#![allow(dead_code)]

use futures_util::future::BoxFuture;
use opswatch::alerts::AlertEngine;
use opswatch::alerts::notify::{NotificationChannel, Notifier};
use opswatch::collector::{CollectorConfig, MetricsCollector};
use opswatch::models::*;
use opswatch::sysinfo_repo::SysinfoRepo;
use std::sync::Arc;
use tokio::sync::mpsc;

pub fn memory(used_percent: f64) -> MemoryUsage {
    let total = 16 * 1024 * 1024 * 1024_u64;
    let used = (total as f64 * used_percent / 100.0) as u64;
    MemoryUsage {
        total,
        used,
        free: total - used,
        used_percent,
    }
}

pub fn snapshot_with_cpu(cpu_percent: f64) -> MetricsSnapshot {
    MetricsSnapshot {
        cpu_percent,
        memory_percent: 40.0,
        memory_total_bytes: 16 * 1024 * 1024 * 1024,
        memory_used_bytes: 6 * 1024 * 1024 * 1024,
        ..Default::default()
    }
}

/// Engine holding a single cpu rule: threshold 80, cooldown 5 min, warning.
pub fn cpu_engine() -> AlertEngine {
    let engine = AlertEngine::new(500, Notifier::new());
    engine
        .add_rule(
            "cpu",
            RuleConfig::new(Metric::Cpu, 80.0)
                .cooldown_ms(300_000)
                .severity(Severity::Warning),
        )
        .unwrap();
    engine
}

pub fn collector_with(engine: Arc<AlertEngine>, config: CollectorConfig) -> Arc<MetricsCollector> {
    Arc::new(MetricsCollector::new(
        Arc::new(SysinfoRepo::new()),
        engine,
        config,
    ))
}

/// Forwards every alert it is given to an mpsc receiver.
pub struct RecordingChannel {
    pub name: String,
    pub tx: mpsc::UnboundedSender<AlertEvent>,
}

impl RecordingChannel {
    pub fn new(name: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<AlertEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                name: name.to_string(),
                tx,
            }),
            rx,
        )
    }
}

impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send<'a>(&'a self, alert: &'a AlertEvent) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.tx.send(alert.clone())?;
            Ok(())
        })
    }
}

pub struct FailingChannel;

impl NotificationChannel for FailingChannel {
    fn name(&self) -> &str {
        "failing"
    }

    fn send<'a>(&'a self, _alert: &'a AlertEvent) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async { Err(anyhow::anyhow!("endpoint unreachable")) })
    }
}

/// Records each alert after waiting `delay`.
pub struct SlowChannel {
    pub delay: std::time::Duration,
    pub inner: Arc<RecordingChannel>,
}

impl NotificationChannel for SlowChannel {
    fn name(&self) -> &str {
        "slow"
    }

    fn send<'a>(&'a self, alert: &'a AlertEvent) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.send(alert).await
        })
    }
}

pub struct PanickingChannel;

impl NotificationChannel for PanickingChannel {
    fn name(&self) -> &str {
        "panicking"
    }

    fn send<'a>(&'a self, alert: &'a AlertEvent) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            if alert.id > 0 {
                panic!("channel bug");
            }
            Ok(())
        })
    }
}

pub fn sample_event(id: u64, severity: Severity) -> AlertEvent {
    AlertEvent {
        id,
        alert_type: "cpu".into(),
        message: "CPU usage high: 92%".into(),
        severity,
        timestamp: 1_700_000_000_000,
        metrics_snapshot: [
            ("cpuUsage".to_string(), "92%".to_string()),
            ("threshold".to_string(), "80%".to_string()),
        ]
        .into_iter()
        .collect(),
        acknowledged: false,
        acknowledged_by: None,
        acknowledged_at: None,
    }
}

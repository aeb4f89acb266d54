// Request counters, bounded host samples and the periodic tick that feeds the alert engine.

pub mod middleware;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::alerts::AlertEngine;
use crate::models::{
    AlertEvent, CollectorStats, DiskUsage, MemoryUsage, MetricSample, MetricsSnapshot,
    RequestStats,
};
use crate::now_millis;
use crate::ring_buffer::RingBuffer;
use crate::sysinfo_repo::SysinfoRepo;
use crate::worker;

/// Buffer sizes and optional readings for the collector.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub sample_capacity: usize,
    pub response_time_capacity: usize,
    /// Path whose filesystem feeds the diskSpace metric; None disables disk readings.
    pub disk_path: Option<PathBuf>,
    /// Requests slower than this are logged at WARN.
    pub slow_request_ms: Option<u64>,
    pub stats_log_interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            sample_capacity: 100,
            response_time_capacity: 1000,
            disk_path: None,
            slow_request_ms: None,
            stats_log_interval: Duration::from_secs(60),
        }
    }
}

struct RequestAggregate {
    total: u64,
    by_method: BTreeMap<String, u64>,
    by_endpoint: BTreeMap<String, u64>,
    by_status_class: BTreeMap<String, u64>,
    response_times: RingBuffer<u64>,
}

impl RequestAggregate {
    fn new(capacity: usize) -> Self {
        Self {
            total: 0,
            by_method: BTreeMap::new(),
            by_endpoint: BTreeMap::new(),
            by_status_class: BTreeMap::new(),
            response_times: RingBuffer::new(capacity),
        }
    }

    fn errors(&self) -> u64 {
        self.by_status_class.get("4xx").copied().unwrap_or(0)
            + self.by_status_class.get("5xx").copied().unwrap_or(0)
    }

    fn error_rate_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.errors() as f64 / self.total as f64 * 100.0).round()
    }

    fn requests_per_minute(&self, elapsed: Duration) -> f64 {
        let minutes = elapsed.as_secs_f64() / 60.0;
        if minutes <= 0.0 {
            return 0.0;
        }
        (self.total as f64 / minutes).round()
    }
}

struct CollectorState {
    requests: RequestAggregate,
    samples: RingBuffer<MetricSample>,
    started_at: Instant,
    started_at_ms: u64,
}

impl CollectorState {
    fn new(config: &CollectorConfig) -> Self {
        Self {
            requests: RequestAggregate::new(config.response_time_capacity),
            samples: RingBuffer::new(config.sample_capacity),
            started_at: Instant::now(),
            started_at_ms: now_millis(),
        }
    }
}

struct Running {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct MetricsCollector {
    state: Mutex<CollectorState>,
    running: Mutex<Option<Running>>,
    sysinfo_repo: Arc<SysinfoRepo>,
    engine: Arc<AlertEngine>,
    config: CollectorConfig,
}

impl MetricsCollector {
    pub fn new(
        sysinfo_repo: Arc<SysinfoRepo>,
        engine: Arc<AlertEngine>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            state: Mutex::new(CollectorState::new(&config)),
            running: Mutex::new(None),
            sysinfo_repo,
            engine,
            config,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("collector state lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    pub fn engine(&self) -> &Arc<AlertEngine> {
        &self.engine
    }

    pub fn sysinfo_repo(&self) -> &Arc<SysinfoRepo> {
        &self.sysinfo_repo
    }

    /// Starts periodic sampling. Returns false (and does nothing) if already running.
    pub fn start(self: &Arc<Self>, interval: Duration) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            tracing::info!("metrics collector already running");
            return false;
        }
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = worker::spawn_sampler(
            self.clone(),
            worker::SamplerConfig {
                sample_interval: interval,
                stats_log_interval: self.config.stats_log_interval,
            },
            shutdown_rx,
        );
        *running = Some(Running {
            shutdown_tx,
            handle,
        });
        tracing::info!(interval_ms = interval.as_millis() as u64, "metrics collector started");
        true
    }

    /// Cancels future ticks; a tick already in progress runs to completion first.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(Running {
            shutdown_tx,
            handle,
        }) = running
        {
            let _ = shutdown_tx.send(());
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "sampler task ended abnormally");
            }
            tracing::info!("metrics collector stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|r| r.as_ref().is_some_and(|r| !r.handle.is_finished()))
            .unwrap_or(false)
    }

    /// One sampling tick: read the host, record a sample, evaluate alert rules.
    /// A failed CPU or memory read skips the sample; the collector keeps running.
    pub async fn tick(&self) -> Option<MetricsSnapshot> {
        let cpu = match self.sysinfo_repo.get_cpu_percent().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, operation = "get_cpu_percent", "CPU sample failed");
                return None;
            }
        };
        let memory = match self.sysinfo_repo.get_memory_usage().await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, operation = "get_memory_usage", "memory sample failed");
                return None;
            }
        };
        let disk = match &self.config.disk_path {
            Some(path) => match self.sysinfo_repo.get_disk_usage(path.clone()).await {
                Ok(d) => Some(d),
                Err(e) => {
                    tracing::debug!(error = %e, operation = "get_disk_usage", "disk sample failed");
                    None
                }
            },
            None => None,
        };
        let (snapshot, _fired) = self.ingest(cpu, memory, disk);
        Some(snapshot)
    }

    /// Records a host reading and runs the alert engine against the resulting snapshot.
    pub fn ingest(
        &self,
        cpu_percent: f64,
        memory: MemoryUsage,
        disk: Option<DiskUsage>,
    ) -> (MetricsSnapshot, Vec<AlertEvent>) {
        let snapshot = {
            let mut state = self.lock();
            let timestamp = now_millis();
            state.samples.push(MetricSample {
                timestamp,
                cpu_percent,
                memory_used_percent: memory.used_percent,
                memory_used_bytes: memory.used,
                memory_total_bytes: memory.total,
            });
            let elapsed = state.started_at.elapsed();
            let requests = &state.requests;
            MetricsSnapshot {
                timestamp,
                cpu_percent,
                memory_percent: memory.used_percent,
                memory_used_bytes: memory.used,
                memory_total_bytes: memory.total,
                average_response_time_ms: requests.response_times.mean().round(),
                response_samples: requests.response_times.len(),
                error_rate_percent: requests.error_rate_percent(),
                requests_per_minute: requests.requests_per_minute(elapsed),
                total_requests: requests.total,
                total_errors: requests.errors(),
                disk,
            }
        };
        let fired = self.engine.evaluate(&snapshot);
        (snapshot, fired)
    }

    /// Called once per completed request. Never panics and never fails the response path.
    pub fn request_hook(&self, method: &str, endpoint: &str, status: u16, elapsed_ms: u64) {
        {
            let mut state = self.lock();
            let requests = &mut state.requests;
            requests.total += 1;
            *requests.by_method.entry(method.to_string()).or_insert(0) += 1;
            *requests.by_endpoint.entry(endpoint.to_string()).or_insert(0) += 1;
            *requests
                .by_status_class
                .entry(format!("{}xx", status / 100))
                .or_insert(0) += 1;
            requests.response_times.push(elapsed_ms);
        }
        if let Some(slow) = self.config.slow_request_ms
            && elapsed_ms > slow
        {
            tracing::warn!(method, endpoint, status, elapsed_ms, "slow request");
        }
    }

    pub fn stats(&self) -> CollectorStats {
        let state = self.lock();
        let requests = &state.requests;
        let elapsed = state.started_at.elapsed();
        CollectorStats {
            requests: RequestStats {
                total: requests.total,
                by_method: requests.by_method.clone(),
                by_endpoint: requests.by_endpoint.clone(),
                by_status_class: requests.by_status_class.clone(),
                average_response_time_ms: requests.response_times.mean().round(),
                requests_per_minute: requests.requests_per_minute(elapsed),
                error_rate_percent: requests.error_rate_percent(),
            },
            samples: state.samples.iter().copied().collect(),
            uptime_ms: elapsed.as_millis() as u64,
            is_monitoring: self.is_running(),
        }
    }

    pub fn latest_sample(&self) -> Option<MetricSample> {
        self.lock().samples.latest().copied()
    }

    /// Clears counters and samples and restarts the uptime clock.
    pub fn reset(&self) {
        *self.lock() = CollectorState::new(&self.config);
        tracing::info!("metrics reset");
    }

    /// Writes a JSON report of the current stats to `path`, creating parent directories.
    pub async fn save_report(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let stats = self.stats();
        let started_at_ms = self.lock().started_at_ms;
        let end_ms = now_millis();
        let report = serde_json::json!({
            "timestamp": rfc3339(end_ms),
            "stats": stats,
            "period": {
                "start": rfc3339(started_at_ms),
                "end": rfc3339(end_ms),
                "durationMs": stats.uptime_ms,
            },
        });
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_vec_pretty(&report)?).await?;
        tracing::info!(path = %path.display(), "monitor report saved");
        Ok(())
    }
}

fn rfc3339(ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(ms as i64)
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_default()
}

// Threshold rules with per-rule cooldown, bounded alert history and notification fan-out.

pub mod notify;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};

use crate::config::AlertsConfig;
use crate::models::{
    AlertEvent, AlertFilter, AlertRule, AlertStats, Metric, MetricsSnapshot, RuleConfig,
};
use crate::now_millis;
use crate::ring_buffer::RingBuffer;
use notify::Notifier;

const HOUR_MS: u64 = 60 * 60 * 1000;
const DAY_MS: u64 = 24 * HOUR_MS;
const EVENTS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("alert {0} not found")]
    NotFound(u64),
    #[error("rule '{0}' not found")]
    UnknownRule(String),
    #[error("invalid rule '{name}': {reason}")]
    InvalidRule { name: String, reason: String },
    #[error("rules file {path}: {source}")]
    RulesIo {
        path: String,
        source: std::io::Error,
    },
    #[error("rules file {path}: {source}")]
    RulesFormat {
        path: String,
        source: serde_json::Error,
    },
}

struct EngineState {
    /// Registration order is evaluation order.
    rules: Vec<AlertRule>,
    last_fired: HashMap<String, Instant>,
    history: RingBuffer<AlertEvent>,
}

pub struct AlertEngine {
    state: Mutex<EngineState>,
    notifier: Notifier,
    events_tx: broadcast::Sender<AlertEvent>,
    next_id: AtomicU64,
}

impl AlertEngine {
    /// Engine with no rules; add them with `add_rule`.
    pub fn new(history_capacity: usize, notifier: Notifier) -> Self {
        let (events_tx, _) = broadcast::channel(EVENTS_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(EngineState {
                rules: Vec::new(),
                last_fired: HashMap::new(),
                history: RingBuffer::new(history_capacity),
            }),
            notifier,
            events_tx,
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers the configured rules, then applies `rules_file` on top when set.
    pub fn from_config(config: &AlertsConfig, notifier: Notifier) -> Result<Self, AlertError> {
        let engine = Self::new(config.history_capacity, notifier);
        for entry in &config.rules {
            engine.add_rule(entry.name.clone(), entry.rule.clone())?;
        }
        if let Some(path) = &config.rules_file {
            engine.load_rules_from_file(path)?;
        }
        Ok(engine)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `name`, replacing (in place) any rule of the same name.
    pub fn add_rule(&self, name: impl Into<String>, config: RuleConfig) -> Result<(), AlertError> {
        let name = name.into();
        let invalid = |reason: &str| AlertError::InvalidRule {
            name: name.clone(),
            reason: reason.to_string(),
        };
        let metric = match config.metric {
            Some(m) => m,
            None => name
                .parse::<Metric>()
                .map_err(|_| invalid("no metric given and name is not a metric"))?,
        };
        if !config.threshold.is_finite() {
            return Err(invalid("threshold must be finite"));
        }
        if !config.critical_multiplier.is_finite() || config.critical_multiplier <= 0.0 {
            return Err(invalid("critical multiplier must be > 0"));
        }
        let rule = AlertRule {
            name: name.clone(),
            metric,
            threshold: config.threshold,
            enabled: config.enabled,
            cooldown_ms: config.cooldown_ms,
            severity: config.severity,
            critical_multiplier: config.critical_multiplier,
        };

        let mut state = self.lock();
        match state.rules.iter_mut().find(|r| r.name == name) {
            Some(existing) => *existing = rule,
            None => state.rules.push(rule),
        }
        tracing::info!(rule = %name, metric = %metric, "alert rule registered");
        Ok(())
    }

    pub fn set_rule_enabled(&self, name: &str, enabled: bool) -> Result<(), AlertError> {
        let mut state = self.lock();
        let rule = state
            .rules
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| AlertError::UnknownRule(name.to_string()))?;
        rule.enabled = enabled;
        tracing::info!(rule = %name, enabled, "alert rule toggled");
        Ok(())
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.lock().rules.clone()
    }

    /// Replaces the webhook channel (or adds one) at runtime.
    pub fn set_webhook(&self, url: &str, timeout: Duration) -> anyhow::Result<()> {
        self.notifier
            .add_channel(std::sync::Arc::new(notify::WebhookChannel::new(url, timeout)?));
        tracing::info!("webhook channel configured");
        Ok(())
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Receiver for every event the engine fires, in firing order.
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.events_tx.subscribe()
    }

    /// Runs every enabled rule against `snapshot` and returns the events fired this tick.
    /// Notification delivery is started but not awaited.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> Vec<AlertEvent> {
        let now = Instant::now();
        let timestamp = now_millis();
        let mut fired = Vec::new();
        {
            let mut guard = self.lock();
            let EngineState {
                rules,
                last_fired,
                history,
            } = &mut *guard;

            for rule in rules.iter() {
                if !rule.enabled {
                    tracing::debug!(rule = %rule.name, "rule disabled; skipped");
                    continue;
                }
                let Some(value) = snapshot.value_of(rule.metric) else {
                    tracing::debug!(rule = %rule.name, "no reading for metric; skipped");
                    continue;
                };
                if value <= rule.threshold {
                    continue;
                }
                if let Some(last) = last_fired.get(&rule.name)
                    && now.duration_since(*last) < Duration::from_millis(rule.cooldown_ms)
                {
                    tracing::debug!(
                        rule = %rule.name,
                        value,
                        threshold = rule.threshold,
                        "alert suppressed by cooldown"
                    );
                    continue;
                }

                let event = AlertEvent {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    alert_type: rule.name.clone(),
                    message: describe(rule, value),
                    severity: rule.severity_for(value),
                    timestamp,
                    metrics_snapshot: metrics_for(rule, value, snapshot),
                    acknowledged: false,
                    acknowledged_by: None,
                    acknowledged_at: None,
                };
                last_fired.insert(rule.name.clone(), now);
                history.push(event.clone());
                fired.push(event);
            }
        }

        for event in &fired {
            tracing::warn!(
                alert_id = event.id,
                alert_type = %event.alert_type,
                severity = %event.severity,
                "{}",
                event.message
            );
            // No subscribers is fine.
            let _ = self.events_tx.send(event.clone());
            // Tracked by the notifier until drained.
            let _ = self.notifier.dispatch(event.clone());
        }
        fired
    }

    /// Matching events, most recent first.
    pub fn get_alerts(&self, filter: &AlertFilter) -> Vec<AlertEvent> {
        self.lock()
            .history
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    /// Marks `id` acknowledged by `actor`. Acknowledging twice keeps the first actor and time.
    pub fn acknowledge(&self, id: u64, actor: Option<&str>) -> Result<AlertEvent, AlertError> {
        let mut state = self.lock();
        let event = state
            .history
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(AlertError::NotFound(id))?;
        if !event.acknowledged {
            event.acknowledged = true;
            event.acknowledged_by = actor.map(str::to_string);
            event.acknowledged_at = Some(now_millis());
            tracing::info!(alert_id = id, actor = ?actor, "alert acknowledged");
        }
        Ok(event.clone())
    }

    pub fn stats(&self) -> AlertStats {
        self.stats_at(now_millis())
    }

    /// Stats with trailing windows ending at `now_ms`.
    pub fn stats_at(&self, now_ms: u64) -> AlertStats {
        let state = self.lock();
        let hour_start = now_ms.saturating_sub(HOUR_MS);
        let day_start = now_ms.saturating_sub(DAY_MS);
        let mut stats = AlertStats {
            total: state.history.len(),
            ..Default::default()
        };
        for event in state.history.iter() {
            if !event.acknowledged {
                stats.unacknowledged += 1;
            }
            if event.timestamp >= day_start {
                stats.last_24h.record(event);
            }
            if event.timestamp >= hour_start {
                stats.last_hour.record(event);
            }
        }
        stats
    }

    /// Loads a JSON object of `{ name: rule }` and registers each entry. Returns the count loaded.
    pub fn load_rules_from_file(&self, path: impl AsRef<Path>) -> Result<usize, AlertError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| AlertError::RulesIo {
            path: shown.clone(),
            source,
        })?;
        let rules: BTreeMap<String, RuleConfig> =
            serde_json::from_str(&content).map_err(|source| AlertError::RulesFormat {
                path: shown.clone(),
                source,
            })?;
        let count = rules.len();
        for (name, rule) in rules {
            self.add_rule(name, rule)?;
        }
        tracing::info!(path = %shown, count, "alert rules loaded");
        Ok(count)
    }

    pub fn save_rules_to_file(&self, path: impl AsRef<Path>) -> Result<(), AlertError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let rules: BTreeMap<String, RuleConfig> = self
            .rules()
            .iter()
            .map(|r| (r.name.clone(), r.to_config()))
            .collect();
        let json =
            serde_json::to_string_pretty(&rules).map_err(|source| AlertError::RulesFormat {
                path: shown.clone(),
                source,
            })?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| AlertError::RulesIo {
                path: shown.clone(),
                source,
            })?;
        }
        std::fs::write(path, json).map_err(|source| AlertError::RulesIo {
            path: shown.clone(),
            source,
        })?;
        tracing::info!(path = %shown, count = rules.len(), "alert rules saved");
        Ok(())
    }
}

fn describe(rule: &AlertRule, value: f64) -> String {
    let unit = rule.metric.unit();
    match rule.metric {
        Metric::Cpu => format!("CPU usage high: {value}{unit}"),
        Metric::Memory => format!("Memory usage high: {value}{unit}"),
        Metric::ResponseTime => format!("Average response time high: {value}{unit}"),
        Metric::ErrorRate => format!("Error rate high: {value}{unit}"),
        Metric::DiskSpace => format!("Disk space low: {value}{unit} used"),
        Metric::RequestsPerMinute => format!("Request rate high: {value}{unit}"),
    }
}

fn gigabytes(bytes: u64) -> String {
    format!("{:.2}GB", bytes as f64 / 1024.0 / 1024.0 / 1024.0)
}

fn metrics_for(rule: &AlertRule, value: f64, snapshot: &MetricsSnapshot) -> BTreeMap<String, String> {
    let unit = rule.metric.unit();
    let mut m = BTreeMap::new();
    m.insert("threshold".to_string(), format!("{}{unit}", rule.threshold));
    match rule.metric {
        Metric::Cpu => {
            m.insert("cpuUsage".into(), format!("{value}{unit}"));
        }
        Metric::Memory => {
            m.insert("memoryUsage".into(), format!("{value}{unit}"));
            m.insert("usedGB".into(), gigabytes(snapshot.memory_used_bytes));
            m.insert("totalGB".into(), gigabytes(snapshot.memory_total_bytes));
        }
        Metric::ResponseTime => {
            m.insert("averageResponseTime".into(), format!("{value}{unit}"));
        }
        Metric::ErrorRate => {
            m.insert("errorRate".into(), format!("{value}{unit}"));
            m.insert("totalRequests".into(), snapshot.total_requests.to_string());
            m.insert("totalErrors".into(), snapshot.total_errors.to_string());
        }
        Metric::DiskSpace => {
            m.insert("diskUsage".into(), format!("{value}{unit}"));
            if let Some(disk) = &snapshot.disk {
                m.insert("mount".into(), disk.mount.clone());
                m.insert("freeSpace".into(), gigabytes(disk.available));
                m.insert("totalSpace".into(), gigabytes(disk.total));
            }
        }
        Metric::RequestsPerMinute => {
            m.insert("requestsPerMinute".into(), format!("{value}"));
            m.insert("totalRequests".into(), snapshot.total_requests.to_string());
        }
    }
    m
}

// Alert rules, fired events, query filters and aggregate counts

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::Metric;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_enabled() -> bool {
    true
}

fn default_cooldown_ms() -> u64 {
    300_000
}

fn default_severity() -> Severity {
    Severity::Warning
}

fn default_critical_multiplier() -> f64 {
    1.1
}

/// Rule settings as supplied by callers, config files and the rules JSON file.
/// Keys are camelCase on the wire; snake_case spellings are accepted from TOML.
/// `metric` may be omitted when the rule name is itself a metric name (`cpu`, `errorRate`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<Metric>,
    pub threshold: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(
        default = "default_cooldown_ms",
        alias = "cooldown_ms",
        alias = "cooldown"
    )]
    pub cooldown_ms: u64,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    /// Values above `threshold * critical_multiplier` escalate to critical.
    #[serde(
        default = "default_critical_multiplier",
        alias = "critical_multiplier"
    )]
    pub critical_multiplier: f64,
}

impl RuleConfig {
    pub fn new(metric: Metric, threshold: f64) -> Self {
        Self {
            metric: Some(metric),
            threshold,
            enabled: default_enabled(),
            cooldown_ms: default_cooldown_ms(),
            severity: default_severity(),
            critical_multiplier: default_critical_multiplier(),
        }
    }

    pub fn cooldown_ms(mut self, cooldown_ms: u64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn critical_multiplier(mut self, multiplier: f64) -> Self {
        self.critical_multiplier = multiplier;
        self
    }
}

/// A registered rule. Cooldown is unsigned, so it can never be negative.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    pub name: String,
    pub metric: Metric,
    pub threshold: f64,
    pub enabled: bool,
    pub cooldown_ms: u64,
    pub severity: Severity,
    pub critical_multiplier: f64,
}

impl AlertRule {
    /// Severity for a breaching value: critical past the escalation point, else the configured one.
    pub fn severity_for(&self, value: f64) -> Severity {
        if value > self.threshold * self.critical_multiplier {
            Severity::Critical
        } else {
            self.severity
        }
    }

    pub fn to_config(&self) -> RuleConfig {
        RuleConfig {
            metric: Some(self.metric),
            threshold: self.threshold,
            enabled: self.enabled,
            cooldown_ms: self.cooldown_ms,
            severity: self.severity,
            critical_multiplier: self.critical_multiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub id: u64,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: u64,
    pub metrics_snapshot: BTreeMap<String, String>,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<u64>,
}

/// Query filter for alert history; every field is optional and they combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AlertFilter {
    pub severity: Option<Severity>,
    #[serde(rename = "type")]
    pub alert_type: Option<String>,
    /// Epoch milliseconds, inclusive.
    pub since: Option<u64>,
    pub acknowledged: Option<bool>,
}

impl AlertFilter {
    pub fn matches(&self, event: &AlertEvent) -> bool {
        self.severity.is_none_or(|s| event.severity == s)
            && self
                .alert_type
                .as_deref()
                .is_none_or(|t| event.alert_type == t)
            && self.since.is_none_or(|since| event.timestamp >= since)
            && self.acknowledged.is_none_or(|a| event.acknowledged == a)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub info: usize,
    pub warning: usize,
    pub critical: usize,
}

impl SeverityCounts {
    pub(crate) fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Info => self.info += 1,
            Severity::Warning => self.warning += 1,
            Severity::Critical => self.critical += 1,
        }
    }
}

/// Counts for one trailing window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowCounts {
    pub total: usize,
    pub by_severity: SeverityCounts,
    pub by_type: BTreeMap<String, usize>,
}

impl WindowCounts {
    pub(crate) fn record(&mut self, event: &AlertEvent) {
        self.total += 1;
        self.by_severity.record(event.severity);
        *self.by_type.entry(event.alert_type.clone()).or_insert(0) += 1;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStats {
    /// Events currently retained in history.
    pub total: usize,
    pub unacknowledged: usize,
    pub last_hour: WindowCounts,
    pub last_24h: WindowCounts,
}

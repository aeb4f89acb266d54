// Samples, request counters and the snapshot rules are evaluated against

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One host reading taken by the sampling tick. Never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub timestamp: u64,
    pub cpu_percent: f64,
    pub memory_used_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub used_percent: f64,
}

/// Free-space reading for the filesystem holding the monitored path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskUsage {
    pub mount: String,
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub used_percent: f64,
}

/// Metric an alert rule watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    Cpu,
    Memory,
    ResponseTime,
    ErrorRate,
    DiskSpace,
    RequestsPerMinute,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cpu => "cpu",
            Metric::Memory => "memory",
            Metric::ResponseTime => "responseTime",
            Metric::ErrorRate => "errorRate",
            Metric::DiskSpace => "diskSpace",
            Metric::RequestsPerMinute => "requestsPerMinute",
        }
    }

    /// Unit suffix used in alert messages.
    pub fn unit(&self) -> &'static str {
        match self {
            Metric::ResponseTime => "ms",
            Metric::RequestsPerMinute => " req/min",
            _ => "%",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Metric::Cpu),
            "memory" => Ok(Metric::Memory),
            "responseTime" => Ok(Metric::ResponseTime),
            "errorRate" => Ok(Metric::ErrorRate),
            "diskSpace" => Ok(Metric::DiskSpace),
            "requestsPerMinute" => Ok(Metric::RequestsPerMinute),
            other => Err(anyhow::anyhow!("unknown metric '{}'", other)),
        }
    }
}

/// Values computed on one tick and handed to the alert engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub average_response_time_ms: f64,
    /// Response-time samples currently buffered; the responseTime rule is skipped when 0.
    pub response_samples: usize,
    pub error_rate_percent: f64,
    pub requests_per_minute: f64,
    pub total_requests: u64,
    pub total_errors: u64,
    pub disk: Option<DiskUsage>,
}

impl MetricsSnapshot {
    /// Current value for `metric`, or None when this tick has no reading for it.
    pub fn value_of(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Cpu => Some(self.cpu_percent),
            Metric::Memory => Some(self.memory_percent),
            Metric::ResponseTime => {
                (self.response_samples > 0).then_some(self.average_response_time_ms)
            }
            Metric::ErrorRate => Some(self.error_rate_percent),
            Metric::DiskSpace => self.disk.as_ref().map(|d| d.used_percent),
            Metric::RequestsPerMinute => Some(self.requests_per_minute),
        }
    }
}

/// Request counters plus derived rates, as returned by `MetricsCollector::stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStats {
    pub total: u64,
    pub by_method: BTreeMap<String, u64>,
    pub by_endpoint: BTreeMap<String, u64>,
    pub by_status_class: BTreeMap<String, u64>,
    pub average_response_time_ms: f64,
    pub requests_per_minute: f64,
    pub error_rate_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorStats {
    pub requests: RequestStats,
    pub samples: Vec<MetricSample>,
    pub uptime_ms: u64,
    pub is_monitoring: bool,
}

// Host identity and the combined stats payload served over HTTP

use serde::{Deserialize, Serialize};

use super::{AlertEvent, AlertStats, CollectorStats, MemoryUsage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    pub platform: String,
    pub arch: String,
    pub hostname: String,
    pub os_version: String,
    pub uptime_secs: u64,
}

/// Body of `GET /api/monitor/stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(flatten)]
    pub collector: CollectorStats,
    pub system: HostInfo,
    pub current_cpu: Option<f64>,
    pub current_memory: Option<MemoryUsage>,
    /// Unacknowledged alerts, newest first.
    pub alerts: Vec<AlertEvent>,
    pub alert_stats: AlertStats,
}

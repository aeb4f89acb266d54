// Domain models shared by the collector, alert engine, cache manager and routes

mod alert;
mod cache;
mod host;
mod metrics;

pub use alert::{
    AlertEvent, AlertFilter, AlertRule, AlertStats, RuleConfig, Severity, SeverityCounts,
    WindowCounts,
};
pub use cache::{CacheManagerStats, CacheStats};
pub use host::{HostInfo, StatsResponse};
pub use metrics::{
    CollectorStats, DiskUsage, MemoryUsage, Metric, MetricSample, MetricsSnapshot, RequestStats,
};

// Library for tests to access modules

pub mod alerts;
pub mod cache;
pub mod collector;
pub mod config;
pub mod models;
pub mod ring_buffer;
pub mod routes;
pub mod sysinfo_repo;
pub mod worker;

/// Wall-clock epoch milliseconds; 0 if the system clock is before the epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, operation = "get_timestamp", "system time error");
            0
        })
}

// Background tasks: the sampling tick (which drives alert evaluation) and cache expiry sweeps.

use crate::cache::CacheManager;
use crate::collector::MetricsCollector;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::time::{Duration, interval};
use tracing::instrument;

/// Sampler timing.
pub struct SamplerConfig {
    pub sample_interval: Duration,
    /// How often to log request/alert totals (real time, independent of the sample interval).
    pub stats_log_interval: Duration,
}

/// Spawns the sampling loop. The first tick fires immediately.
/// Shutdown is only observed between ticks, so an in-flight tick always completes.
pub fn spawn_sampler(
    collector: Arc<MetricsCollector>,
    config: SamplerConfig,
    shutdown_rx: oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_sampler(collector, config, shutdown_rx))
}

#[instrument(
    skip_all,
    fields(sample_interval_ms = config.sample_interval.as_millis() as u64)
)]
async fn run_sampler(
    collector: Arc<MetricsCollector>,
    config: SamplerConfig,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut tick = interval(config.sample_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut stats_log_tick = interval(config.stats_log_interval);
    stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // interval() fires at once; skip the immediate stats line.
    stats_log_tick.tick().await;

    let mut ticks_total: u64 = 0;
    let mut ticks_skipped: u64 = 0;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                ticks_total += 1;
                if collector.tick().await.is_none() {
                    ticks_skipped += 1;
                }
            }
            _ = &mut shutdown_rx => {
                tracing::debug!("Sampler shutting down");
                break;
            }
            _ = stats_log_tick.tick() => {
                let stats = collector.stats();
                let alert_stats = collector.engine().stats();
                tracing::info!(
                    requests_total = stats.requests.total,
                    error_rate_percent = stats.requests.error_rate_percent,
                    avg_response_ms = stats.requests.average_response_time_ms,
                    alerts_last_hour = alert_stats.last_hour.total,
                    alerts_unacknowledged = alert_stats.unacknowledged,
                    ticks_total,
                    ticks_skipped,
                    "app stats"
                );
            }
        }
    }
}

/// Spawns the expiry sweeper. Every `poll` it sweeps the instances whose own sweep
/// interval has elapsed, so instances registered after startup are covered too.
/// Exits when `shutdown_rx` observes `true` (or its sender is dropped).
pub fn spawn_cache_sweeper(
    cache: Arc<CacheManager>,
    poll: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(poll);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    for (name, removed) in cache.sweep_due() {
                        if removed > 0 {
                            tracing::debug!(cache = %name, removed, "expired entries swept");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::debug!("Cache sweeper shutting down");
                        break;
                    }
                }
            }
        }
    })
}

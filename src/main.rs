use anyhow::Result;
use opswatch::*;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("Received shutdown signal");
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let notifier = alerts::notify::Notifier::from_config(&app_config.notifications)?;
    let engine = Arc::new(alerts::AlertEngine::from_config(
        &app_config.alerts,
        notifier,
    )?);
    let cache = Arc::new(cache::CacheManager::from_config(&app_config.caches));
    let sysinfo_repo = Arc::new(sysinfo_repo::SysinfoRepo::new());

    let slow_request_ms = engine
        .rules()
        .iter()
        .find(|r| r.metric == models::Metric::ResponseTime)
        .map(|r| r.threshold as u64);
    let collector = Arc::new(collector::MetricsCollector::new(
        sysinfo_repo,
        engine.clone(),
        collector::CollectorConfig {
            sample_capacity: app_config.monitoring.sample_capacity,
            response_time_capacity: app_config.monitoring.response_time_capacity,
            disk_path: Some(sysinfo_repo::resolve_disk_path(
                &app_config.monitoring.disk_path,
            )),
            slow_request_ms,
            stats_log_interval: Duration::from_secs(app_config.monitoring.stats_log_interval_secs),
        },
    ));
    collector.start(Duration::from_millis(
        app_config.monitoring.sample_interval_ms,
    ));

    let (sweep_shutdown_tx, sweep_shutdown_rx) = watch::channel(false);
    let sweeper =
        worker::spawn_cache_sweeper(cache.clone(), Duration::from_secs(1), sweep_shutdown_rx);

    let app = routes::app(collector.clone(), cache);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    collector.stop().await;
    engine
        .notifier()
        .drain(app_config.notifications.delivery_timeout() + Duration::from_secs(1))
        .await;
    let _ = sweep_shutdown_tx.send(true);
    let _ = sweeper.await;
    Ok(())
}

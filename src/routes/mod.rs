// HTTP routes: monitoring queries and alert acknowledgement

mod http;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::alerts::AlertEngine;
use crate::cache::CacheManager;
use crate::collector::MetricsCollector;
use crate::collector::middleware::track_requests;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) collector: Arc<MetricsCollector>,
    pub(crate) engine: Arc<AlertEngine>,
    pub(crate) cache: Arc<CacheManager>,
}

/// Monitoring router. Every route is counted by the request-tracking middleware.
pub fn app(collector: Arc<MetricsCollector>, cache: Arc<CacheManager>) -> Router {
    let state = AppState {
        engine: collector.engine().clone(),
        collector: collector.clone(),
        cache,
    };
    Router::new()
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/monitor/stats", get(http::stats_handler)) // GET /api/monitor/stats
        .route("/api/monitor/cache", get(http::cache_stats_handler)) // GET /api/monitor/cache
        .route("/api/monitor/cache/flush", post(http::cache_flush_handler)) // POST /api/monitor/cache/flush
        .route("/api/monitor/alerts", get(http::alerts_handler)) // GET /api/monitor/alerts
        .route("/api/monitor/alerts/stats", get(http::alert_stats_handler)) // GET /api/monitor/alerts/stats
        .route(
            "/api/monitor/alerts/{id}/acknowledge",
            post(http::acknowledge_handler),
        ) // POST /api/monitor/alerts/{id}/acknowledge
        .route("/api/monitor/rules", get(http::rules_handler)) // GET /api/monitor/rules
        .layer(middleware::from_fn_with_state(collector, track_requests))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

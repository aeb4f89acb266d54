// JSON handlers for stats, cache, alerts and rules

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use super::AppState;
use crate::alerts::AlertError;
use crate::models::{AlertFilter, StatsResponse};

pub(super) const ACTOR_HEADER: &str = "x-actor-id";

/// GET /version: service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/monitor/stats: collector stats plus host identity and a live CPU/memory reading.
pub(super) async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    let repo = state.collector.sysinfo_repo();
    let current_cpu = repo
        .get_cpu_percent()
        .await
        .inspect_err(|e| tracing::debug!(error = %e, "live CPU reading failed"))
        .ok();
    let current_memory = repo
        .get_memory_usage()
        .await
        .inspect_err(|e| tracing::debug!(error = %e, "live memory reading failed"))
        .ok();
    Json(StatsResponse {
        collector: state.collector.stats(),
        system: repo.get_host_info(),
        current_cpu,
        current_memory,
        alerts: state.engine.get_alerts(&AlertFilter {
            acknowledged: Some(false),
            ..Default::default()
        }),
        alert_stats: state.engine.stats(),
    })
}

/// GET /api/monitor/cache
pub(super) async fn cache_stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.cache.stats())
}

/// POST /api/monitor/cache/flush
pub(super) async fn cache_flush_handler(State(state): State<AppState>) -> impl IntoResponse {
    let removed = state.cache.flush_all();
    Json(serde_json::json!({ "flushed": removed }))
}

/// GET /api/monitor/alerts?severity=&type=&since=&acknowledged=
pub(super) async fn alerts_handler(
    State(state): State<AppState>,
    Query(filter): Query<AlertFilter>,
) -> impl IntoResponse {
    Json(state.engine.get_alerts(&filter))
}

/// GET /api/monitor/alerts/stats
pub(super) async fn alert_stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.stats())
}

/// POST /api/monitor/alerts/{id}/acknowledge: actor taken from the `x-actor-id` header.
pub(super) async fn acknowledge_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let actor = headers.get(ACTOR_HEADER).and_then(|v| v.to_str().ok());
    match state.engine.acknowledge(id, actor) {
        Ok(alert) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "acknowledged", "alert": alert })),
        ),
        Err(AlertError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "not found" })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

/// GET /api/monitor/rules
pub(super) async fn rules_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.rules())
}

// Axum middleware feeding every completed request into the collector.

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tokio::time::Instant;

use super::MetricsCollector;

/// Records method, route pattern (falling back to the raw path), status and elapsed time.
pub async fn track_requests(
    State(collector): State<Arc<MetricsCollector>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;

    collector.request_hook(
        &method,
        &endpoint,
        response.status().as_u16(),
        start.elapsed().as_millis() as u64,
    );
    response
}

// Axum middleware serving cached JSON bodies and capturing successful JSON responses.

use axum::{
    Json,
    body::{Body, HttpBody},
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::sync::Arc;
use tokio::time::Duration;

use super::CacheManager;
use crate::config::DEFAULT_CACHE;

/// Bodies larger than this are passed through uncached.
const MAX_CACHED_BODY: usize = 4 * 1024 * 1024;

pub type KeyFn = Arc<dyn Fn(&Request) -> String + Send + Sync>;
pub type SkipFn = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// `METHOD:path?query`
pub fn default_key(request: &Request) -> String {
    let uri = request.uri();
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    format!("{}:{}", request.method(), path)
}

/// How a wrapped route is cached.
#[derive(Clone)]
pub struct CachePolicy {
    pub ttl: Option<Duration>,
    pub cache_name: String,
    pub key_fn: KeyFn,
    pub skip: SkipFn,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE)
    }
}

impl CachePolicy {
    pub fn new(cache_name: &str) -> Self {
        Self {
            ttl: None,
            cache_name: cache_name.to_string(),
            key_fn: Arc::new(default_key),
            skip: Arc::new(|_: &Request| false),
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn key_fn(mut self, f: impl Fn(&Request) -> String + Send + Sync + 'static) -> Self {
        self.key_fn = Arc::new(f);
        self
    }

    pub fn skip(mut self, f: impl Fn(&Request) -> bool + Send + Sync + 'static) -> Self {
        self.skip = Arc::new(f);
        self
    }
}

#[derive(Clone)]
pub struct CacheLayerState {
    pub cache: Arc<CacheManager>,
    pub policy: CachePolicy,
}

impl CacheLayerState {
    pub fn new(cache: Arc<CacheManager>, policy: CachePolicy) -> Self {
        Self { cache, policy }
    }
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

/// Use with `axum::middleware::from_fn_with_state(CacheLayerState, cache_responses)`.
pub async fn cache_responses(
    State(state): State<CacheLayerState>,
    request: Request,
    next: Next,
) -> Response {
    let policy = &state.policy;
    if (policy.skip)(&request) {
        return next.run(request).await;
    }

    let key = (policy.key_fn)(&request);
    if let Some(value) = state.cache.get(&key, &policy.cache_name) {
        tracing::debug!(cache = %policy.cache_name, key = %key, "serving cached response");
        let mut response = Json(value).into_response();
        response
            .headers_mut()
            .insert("x-cache", HeaderValue::from_static("HIT"));
        return response;
    }

    let response = next.run(request).await;
    if !response.status().is_success() || !is_json(&response) {
        return response;
    }
    let fits = response
        .body()
        .size_hint()
        .exact()
        .is_some_and(|n| n as usize <= MAX_CACHED_BODY);
    if !fits {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes: Bytes = match axum::body::to_bytes(body, MAX_CACHED_BODY).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "failed to buffer response for caching");
            return axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(value) => {
            // Rejections are logged inside set; the response goes out regardless.
            let _ = state
                .cache
                .set(&key, &value, policy.ttl, &policy.cache_name);
        }
        Err(e) => tracing::debug!(key = %key, error = %e, "response body is not JSON; not cached"),
    }
    parts
        .headers
        .insert("x-cache", HeaderValue::from_static("MISS"));
    Response::from_parts(parts, Body::from(bytes))
}

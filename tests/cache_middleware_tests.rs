// Response caching middleware over a small router

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware,
    routing::get,
};
use axum_test::TestServer;
use opswatch::cache::CacheManager;
use opswatch::cache::middleware::{CacheLayerState, CachePolicy, cache_responses, default_key};
use opswatch::config::DEFAULT_CACHE;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Duration;

type Calls = Arc<AtomicUsize>;

async fn products(State(calls): State<Calls>) -> Json<serde_json::Value> {
    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "products": [{ "id": 1 }], "generation": n }))
}

async fn broken(State(calls): State<Calls>) -> (StatusCode, Json<serde_json::Value>) {
    calls.fetch_add(1, Ordering::SeqCst);
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "db down" })))
}

async fn plain(State(calls): State<Calls>) -> &'static str {
    calls.fetch_add(1, Ordering::SeqCst);
    "ok"
}

fn server(cache: Arc<CacheManager>, policy: CachePolicy) -> (TestServer, Calls) {
    let calls: Calls = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/api/products", get(products))
        .route("/api/broken", get(broken))
        .route("/api/plain", get(plain))
        .layer(middleware::from_fn_with_state(
            CacheLayerState::new(cache, policy),
            cache_responses,
        ))
        .with_state(calls.clone());
    (TestServer::new(app), calls)
}

#[tokio::test]
async fn test_second_request_served_from_cache() {
    let cache = Arc::new(CacheManager::new());
    let (server, calls) = server(cache.clone(), CachePolicy::default());

    let first = server.get("/api/products").await;
    first.assert_status_ok();
    assert_eq!(first.header("x-cache"), "MISS");

    let second = server.get("/api/products").await;
    second.assert_status_ok();
    assert_eq!(second.header("x-cache"), "HIT");
    assert_eq!(
        second.json::<serde_json::Value>(),
        first.json::<serde_json::Value>()
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.keys(DEFAULT_CACHE), ["GET:/api/products"]);
}

#[tokio::test]
async fn test_query_string_is_part_of_key() {
    let cache = Arc::new(CacheManager::new());
    let (server, calls) = server(cache.clone(), CachePolicy::default());

    server.get("/api/products?page=1").await.assert_status_ok();
    server.get("/api/products?page=2").await.assert_status_ok();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        cache.keys(DEFAULT_CACHE),
        ["GET:/api/products?page=1", "GET:/api/products?page=2"]
    );
}

#[tokio::test]
async fn test_error_responses_not_cached() {
    let cache = Arc::new(CacheManager::new());
    let (server, calls) = server(cache.clone(), CachePolicy::default());

    for _ in 0..2 {
        let response = server.get("/api/broken").expect_failure().await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(cache.keys(DEFAULT_CACHE).is_empty());
}

#[tokio::test]
async fn test_non_json_not_cached() {
    let cache = Arc::new(CacheManager::new());
    let (server, calls) = server(cache.clone(), CachePolicy::default());

    server.get("/api/plain").await.assert_text("ok");
    server.get("/api/plain").await.assert_text("ok");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_skip_predicate_bypasses_cache() {
    let cache = Arc::new(CacheManager::new());
    let policy = CachePolicy::default()
        .skip(|req: &Request| req.headers().contains_key("authorization"));
    let (server, calls) = server(cache.clone(), policy);

    server
        .get("/api/products")
        .add_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer token"))
        .await
        .assert_status_ok();
    server
        .get("/api/products")
        .add_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer token"))
        .await
        .assert_status_ok();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(cache.keys(DEFAULT_CACHE).is_empty());
}

#[tokio::test]
async fn test_custom_key_and_named_cache() {
    let cache = Arc::new(CacheManager::new());
    cache.register_cache(
        "products",
        &opswatch::config::CacheConfig {
            default_ttl_secs: 600,
            sweep_interval_secs: 120,
        },
    );
    let policy = CachePolicy::new("products")
        .ttl(Duration::from_secs(30))
        .key_fn(|req: &Request| format!("products:{}", default_key(req)));
    let (server, _) = server(cache.clone(), policy);

    server.get("/api/products").await.assert_status_ok();
    assert_eq!(cache.keys("products"), ["products:GET:/api/products"]);
    assert!(cache.keys(DEFAULT_CACHE).is_empty());

    // Invalidation drops the cached response.
    cache.invalidate_products();
    let response = server.get("/api/products").await;
    assert_eq!(response.header("x-cache"), "MISS");
}

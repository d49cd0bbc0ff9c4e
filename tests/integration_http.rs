//! Integration tests for the HTTP surface
//!
//! Most tests drive the router in-process with `tower::ServiceExt::oneshot`;
//! one binds a real socket so the gate sees a peer address.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use briefing_cache::config::RateLimitSettings;
use briefing_cache::rate_limit::RateLimitService;
use briefing_cache::routes::AppState;
use briefing_cache::{CacheManager, RateLimitBackend, server};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn settings(requests: u32) -> RateLimitSettings {
    RateLimitSettings {
        requests,
        window_seconds: 60,
        ..RateLimitSettings::default()
    }
}

fn app_with(cache: Arc<CacheManager>, limiter: Arc<dyn RateLimitBackend>, settings: RateLimitSettings) -> Router {
    server::app(AppState::new(cache, limiter, settings))
}

async fn local_app(settings: RateLimitSettings) -> Router {
    app_with(setup_memory_manager().await, Arc::new(RateLimitService::local()), settings)
}

async fn send(app: &Router, method: Method, uri: &str, client: &str) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", client)
        .body(Body::empty())
        .unwrap_or_else(|e| panic!("bad request: {e}"));
    app.clone().oneshot(request).await.unwrap_or_else(|e| panic!("router failed: {e}"))
}

async fn send_json(app: &Router, method: Method, uri: &str, body: serde_json::Value) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|e| panic!("bad request: {e}"));
    app.clone().oneshot(request).await.unwrap_or_else(|e| panic!("router failed: {e}"))
}

async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap_or_else(|e| panic!("body read failed: {e}"));
    serde_json::from_slice(&bytes).unwrap_or_else(|e| panic!("body is not JSON: {e}"))
}

fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|value| value.to_str().ok())
}

// ===== Rate-limit gate =====

#[tokio::test]
async fn test_quota_headers_and_rejection() {
    let app = local_app(settings(2)).await;

    let first = send(&app, Method::GET, "/cache/stats", "203.0.113.7").await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header(&first, "x-ratelimit-limit"), Some("2"));
    assert_eq!(header(&first, "x-ratelimit-remaining"), Some("1"));
    let reset: i64 = header(&first, "x-ratelimit-reset").unwrap().parse().unwrap();
    assert!(reset > chrono::Utc::now().timestamp());

    let second = send(&app, Method::GET, "/cache/stats", "203.0.113.7").await;
    assert_eq!(header(&second, "x-ratelimit-remaining"), Some("0"));

    let third = send(&app, Method::GET, "/cache/stats", "203.0.113.7").await;
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = header(&third, "retry-after").unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(header(&third, "x-ratelimit-remaining"), Some("0"));

    let body = json_body(third).await;
    assert_eq!(body["error"], "rate_limit_exceeded");
    assert_eq!(body["limit"], 2);
    assert_eq!(body["remaining"], 0);
    assert_eq!(body["retry_after"], retry_after);
    assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
    let reset_at = body["reset_at"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(reset_at).is_ok());

    // Another client is unaffected
    let other = send(&app, Method::GET, "/cache/stats", "198.51.100.2").await;
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_forwarded_chain_uses_first_hop() {
    let app = local_app(settings(1)).await;

    let first = send(&app, Method::GET, "/cache/ttl", "203.0.113.7, 10.0.0.1").await;
    assert_eq!(first.status(), StatusCode::OK);

    // Same client behind a different proxy
    let second = send(&app, Method::GET, "/cache/ttl", "203.0.113.7, 10.0.0.2").await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_rejection_is_logged_as_warning() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let app = local_app(settings(1)).await;
    send(&app, Method::GET, "/cache/ttl", "203.0.113.50").await;
    let blocked = send(&app, Method::GET, "/cache/ttl", "203.0.113.50").await;
    assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);

    let output = String::from_utf8(logs.0.lock().clone()).unwrap_or_default();
    let line = output
        .lines()
        .find(|line| line.contains("Rate limit exceeded"))
        .unwrap_or_else(|| panic!("no rejection logged in {output:?}"));
    assert!(line.contains("WARN"));
    assert!(line.contains("identifier=203.0.113.50"));
    assert!(line.contains("path=/cache/ttl"));
    assert!(line.contains("retry_after="));
}

#[tokio::test]
async fn test_excluded_paths_bypass_gate() {
    let app = local_app(settings(1)).await;

    for _ in 0..5 {
        let response = send(&app, Method::GET, "/health", "203.0.113.7").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(header(&response, "x-ratelimit-limit").is_none());
    }

    let root = send(&app, Method::GET, "/", "203.0.113.7").await;
    assert_eq!(root.status(), StatusCode::OK);

    // The quota is still untouched
    let limited = send(&app, Method::GET, "/cache/health", "203.0.113.7").await;
    assert_eq!(limited.status(), StatusCode::OK);
    assert_eq!(header(&limited, "x-ratelimit-remaining"), Some("0"));
}

#[tokio::test]
async fn test_disabled_gate_passes_everything() {
    let app = local_app(RateLimitSettings {
        enabled: false,
        ..settings(1)
    })
    .await;

    for _ in 0..3 {
        let response = send(&app, Method::GET, "/cache/stats", "203.0.113.7").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(header(&response, "x-ratelimit-limit").is_none());
    }
}

#[tokio::test]
async fn test_headers_disabled_still_sends_retry_after() {
    let app = local_app(RateLimitSettings {
        include_headers: false,
        ..settings(1)
    })
    .await;

    let ok = send(&app, Method::GET, "/cache/stats", "203.0.113.7").await;
    assert!(header(&ok, "x-ratelimit-limit").is_none());

    let blocked = send(&app, Method::GET, "/cache/stats", "203.0.113.7").await;
    assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(header(&blocked, "retry-after").is_some());
    assert!(header(&blocked, "x-ratelimit-limit").is_none());
}

/// A failing limiter lets every request through
#[tokio::test]
async fn test_gate_fails_open() {
    let failing = Arc::new(FailingLimiter::default());
    let app = app_with(setup_memory_manager().await, failing.clone(), settings(1));

    for _ in 0..3 {
        let response = send(&app, Method::GET, "/cache/stats", "203.0.113.7").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(header(&response, "x-ratelimit-limit").is_none());
    }
    assert_eq!(failing.calls(), 3);
}

#[tokio::test]
async fn test_api_key_identifier() {
    let app = local_app(RateLimitSettings {
        identifier: briefing_cache::IdentifierSource::ApiKey,
        ..settings(1)
    })
    .await;

    let request = |key: &'static str| {
        Request::builder()
            .uri("/cache/ttl")
            .header("x-api-key", key)
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap()
    };

    assert_eq!(app.clone().oneshot(request("alpha")).await.unwrap().status(), StatusCode::OK);
    assert_eq!(app.clone().oneshot(request("beta")).await.unwrap().status(), StatusCode::OK);
    assert_eq!(
        app.clone().oneshot(request("alpha")).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

// ===== Cache routes =====

#[tokio::test]
async fn test_cache_admin_routes() {
    let cache = setup_memory_manager().await;
    let app = app_with(Arc::clone(&cache), Arc::new(RateLimitService::local()), settings(1000));

    for key in ["stock_AAPL", "stock_TSLA", "news_AAPL", "chart_AAPL_5d"] {
        cache.set(key, serde_json::json!({"k": key}), Duration::from_secs(300)).unwrap();
    }

    let keys = json_body(send(&app, Method::GET, "/cache/keys?pattern=stock_*&limit=10", "10.0.0.1").await).await;
    assert_eq!(keys["count"], 2);
    assert_eq!(keys["keys"].as_array().map(Vec::len), Some(2));

    let cleared = json_body(send_json(&app, Method::POST, "/cache/clear", serde_json::json!({"pattern": "stock_*"})).await).await;
    assert_eq!(cleared["success"], true);
    assert_eq!(cleared["cleared_count"], 2);
    assert!(cache.get("news_AAPL").is_some());

    let deleted = send(&app, Method::DELETE, "/cache/chart_AAPL_*", "10.0.0.1").await;
    assert_eq!(deleted.status(), StatusCode::OK);
    assert_eq!(json_body(deleted).await["cleared_count"], 1);

    let stats = json_body(send(&app, Method::GET, "/cache/stats", "10.0.0.1").await).await;
    assert_eq!(stats["backend_mode"], "memory");
    assert_eq!(stats["tier1"]["key_count"], 1);
    assert!(stats["tier2"].is_null());
    assert!(stats["last_cleared"].is_string());

    let health = json_body(send(&app, Method::GET, "/cache/health", "10.0.0.1").await).await;
    assert_eq!(health["status"], "healthy");

    let ttl = json_body(send(&app, Method::GET, "/cache/ttl", "10.0.0.1").await).await;
    assert_eq!(ttl["strategies"].as_array().map(Vec::len), Some(11));

    // Clear everything with an empty request
    let request = Request::builder()
        .method(Method::POST)
        .uri("/cache/clear")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(cache.tier1().is_empty());
}

#[tokio::test]
async fn test_bad_requests() {
    let app = local_app(settings(1000)).await;

    for uri in ["/cache/keys?limit=0", "/cache/keys?limit=1001", "/cache/keys?pattern=stock_%5BA"] {
        let response = send(&app, Method::GET, uri, "10.0.0.1").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        let body = json_body(response).await;
        assert_eq!(body["error"], "bad_request");
        assert!(body["message"].is_string());
    }

    let response = send_json(&app, Method::POST, "/cache/clear", serde_json::json!({"pattern": "[abc"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ===== Rate-limit admin routes =====

#[tokio::test]
async fn test_rate_limit_admin_routes() {
    let app = local_app(settings(2)).await;

    send(&app, Method::GET, "/cache/ttl", "203.0.113.7").await;
    send(&app, Method::GET, "/cache/ttl", "203.0.113.7").await;
    let blocked = send(&app, Method::GET, "/cache/ttl", "203.0.113.7").await;
    assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);

    // Admin calls come from a different client so they are not blocked
    let status = json_body(send(&app, Method::GET, "/rate-limit/status", "10.0.0.1").await).await;
    assert_eq!(status["enabled"], true);
    assert_eq!(status["requests_per_window"], 2);
    assert_eq!(status["identifier_type"], "ip");
    assert_eq!(status["storage_backend"], "memory");

    // Three ttl calls, the status call and this one
    let stats = json_body(send(&app, Method::GET, "/rate-limit/stats", "10.0.0.2").await).await;
    assert_eq!(stats["total_requests"], 5);
    assert_eq!(stats["blocked_requests"], 1);

    let reset = json_body(send(&app, Method::DELETE, "/rate-limit/203.0.113.7", "10.0.0.3").await).await;
    assert_eq!(reset["reset"], true);

    let again = send(&app, Method::GET, "/cache/ttl", "203.0.113.7").await;
    assert_eq!(again.status(), StatusCode::OK);
}

// ===== Real socket =====

/// Without forwarding headers the peer address identifies the client
#[tokio::test]
async fn test_served_over_tcp_uses_peer_address() {
    let cache = setup_memory_manager().await;
    let limiter = Arc::new(RateLimitService::local());
    let app = server::app(AppState::new(
        Arc::clone(&cache),
        limiter.clone(),
        RateLimitSettings {
            exclude_paths: vec!["/health".to_string(), "/rate-limit".to_string()],
            ..settings(1)
        },
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(server::serve(listener, app, async move {
        let _ = stop_rx.await;
    }));

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let base = format!("http://{addr}");

    let first = client.get(format!("{base}/cache/stats")).send().await.unwrap();
    assert_eq!(first.status(), reqwest::StatusCode::OK);

    let second = client.get(format!("{base}/cache/stats")).send().await.unwrap();
    assert_eq!(second.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("retry-after"));

    let reset = client.delete(format!("{base}/rate-limit/127.0.0.1")).send().await.unwrap();
    let body: serde_json::Value = reset.json().await.unwrap();
    assert_eq!(body["reset"], true);

    let third = client.get(format!("{base}/cache/stats")).send().await.unwrap();
    assert_eq!(third.status(), reqwest::StatusCode::OK);

    let _ = stop_tx.send(());
    handle.await.unwrap().unwrap();
}

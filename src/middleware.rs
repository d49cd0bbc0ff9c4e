//! Rate-Limit Request Gate
//!
//! Axum middleware in front of every route. Resolves a caller identifier,
//! consults the limiter, attaches quota headers and rejects over-quota callers
//! with 429. A limiter failure lets the request through.

use axum::Json;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, warn};

use crate::config::RateLimitSettings;
use crate::rate_limit::{IdentifierSource, RateLimitResult};
use crate::traits::RateLimitBackend;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const UNKNOWN_CLIENT: &str = "unknown";

/// State for [`rate_limit_middleware`]
#[derive(Clone)]
pub struct RateLimitGate {
    limiter: Arc<dyn RateLimitBackend>,
    settings: Arc<RateLimitSettings>,
}

impl RateLimitGate {
    #[must_use]
    pub fn new(limiter: Arc<dyn RateLimitBackend>, settings: Arc<RateLimitSettings>) -> Self {
        Self { limiter, settings }
    }

    #[must_use]
    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }
}

/// Client address: first forwarded-for hop, then X-Real-IP, then the socket
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    // X-Forwarded-For can carry a chain, the first entry is the client
    if let Some(first) = header("x-forwarded-for")
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return first.to_string();
    }

    if let Some(real_ip) = header("x-real-ip") {
        return real_ip.to_string();
    }

    peer.map_or_else(|| UNKNOWN_CLIENT.to_string(), |addr| addr.ip().to_string())
}

/// Identifier the limiter counts against
///
/// Header-based sources fall back to the client address when their header is
/// absent.
#[must_use]
pub fn resolve_identifier(headers: &HeaderMap, peer: Option<SocketAddr>, source: IdentifierSource) -> String {
    let keyed = |name: &str, prefix: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| format!("{prefix}:{value}"))
    };

    let identifier = match source {
        IdentifierSource::Ip => None,
        IdentifierSource::ApiKey => keyed("x-api-key", "api_key"),
        IdentifierSource::UserId => keyed("x-user-id", "user"),
    };

    identifier.unwrap_or_else(|| client_ip(headers, peer))
}

fn insert_quota_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(result.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(result.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(result.reset_epoch()));
}

/// Body of a 429 response
#[derive(Debug, Serialize)]
struct RateLimitExceededBody {
    error: &'static str,
    message: String,
    retry_after: u64,
    limit: u32,
    remaining: u32,
    reset_at: DateTime<Utc>,
}

/// Rejection for an over-quota caller
pub struct RateLimitExceeded {
    result: RateLimitResult,
    include_headers: bool,
}

impl IntoResponse for RateLimitExceeded {
    fn into_response(self) -> Response {
        let retry_after = self.result.retry_after.unwrap_or(1);
        let body = RateLimitExceededBody {
            error: "rate_limit_exceeded",
            message: format!("Too many requests. Please retry after {retry_after} seconds."),
            retry_after,
            limit: self.result.limit,
            remaining: 0,
            reset_at: self.result.reset_at,
        };

        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
        if self.include_headers {
            insert_quota_headers(headers, &self.result);
        }
        response
    }
}

/// Rate limiting middleware
///
/// Install with `axum::middleware::from_fn_with_state(gate, rate_limit_middleware)`.
/// The socket address is read from [`ConnectInfo`] when the server provides it.
pub async fn rate_limit_middleware(State(gate): State<RateLimitGate>, request: Request, next: Next) -> Response {
    let settings = &gate.settings;
    if !settings.enabled || settings.is_excluded(request.uri().path()) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identifier = resolve_identifier(request.headers(), peer, settings.identifier);

    let result = match gate
        .limiter
        .check(&identifier, settings.requests, settings.window_seconds)
        .await
    {
        Ok(result) => result,
        Err(e) => {
            error!(identifier = %identifier, error = %format!("{e:#}"), "Rate limit check failed, allowing request");
            return next.run(request).await;
        }
    };

    if !result.allowed {
        warn!(
            identifier = %identifier,
            path = %request.uri().path(),
            retry_after = result.retry_after.unwrap_or(1),
            "Rate limit exceeded"
        );
        return RateLimitExceeded {
            result,
            include_headers: settings.include_headers,
        }
        .into_response();
    }

    let mut response = next.run(request).await;
    if settings.include_headers {
        insert_quota_headers(response.headers_mut(), &result);
    }
    response
}

//! HTTP Routes - Cache and Rate-Limit Administration
//!
//! Thin handlers over [`CacheManager`] and the rate limiter. Every handler
//! takes [`AppState`]; nothing here keeps state of its own.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::backends::KeyInfo;
use crate::cache_manager::{CacheManager, ClearReport, Layer};
use crate::config::RateLimitSettings;
use crate::error::CacheError;
use crate::strategy::{TtlEntry, ttl_table};
use crate::traits::RateLimitBackend;

/// Largest page `GET /cache/keys` returns
pub const MAX_KEYS_LIMIT: usize = 1000;

const DEFAULT_KEYS_LIMIT: usize = 100;

// ============================================================================
// SHARED STATE
// ============================================================================

/// Services shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheManager>,
    pub limiter: Arc<dyn RateLimitBackend>,
    pub rate_limit: Arc<RateLimitSettings>,
}

impl AppState {
    pub fn new(cache: Arc<CacheManager>, limiter: Arc<dyn RateLimitBackend>, rate_limit: RateLimitSettings) -> Self {
        Self {
            cache,
            limiter,
            rate_limit: Arc::new(rate_limit),
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors returned to HTTP callers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        };
        let body = ErrorBody {
            error,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

fn default_layers() -> Vec<Layer> {
    Layer::ALL.to_vec()
}

fn default_keys_pattern() -> String {
    "*".to_string()
}

fn default_keys_limit() -> usize {
    DEFAULT_KEYS_LIMIT
}

/// Body of `POST /cache/clear`; both fields optional
#[derive(Debug, Deserialize)]
pub struct ClearRequest {
    pub pattern: Option<String>,
    #[serde(default = "default_layers")]
    pub layers: Vec<Layer>,
}

impl Default for ClearRequest {
    fn default() -> Self {
        Self {
            pattern: None,
            layers: default_layers(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub success: bool,
    pub pattern: String,
    pub layers: Vec<Layer>,
    pub cleared_count: usize,
    /// False when the distributed tier could not count what it flushed
    pub exact: bool,
}

impl ClearResponse {
    fn new(pattern: Option<String>, layers: Vec<Layer>, report: ClearReport) -> Self {
        Self {
            success: true,
            pattern: pattern.unwrap_or_else(default_keys_pattern),
            layers,
            cleared_count: report.cleared,
            exact: report.exact,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct KeysQuery {
    #[serde(default = "default_keys_pattern")]
    pub pattern: String,
    #[serde(default = "default_keys_limit")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct KeysResponse {
    pub pattern: String,
    pub count: usize,
    pub limit: usize,
    pub keys: Vec<KeyInfo>,
}

#[derive(Debug, Serialize)]
pub struct TtlResponse {
    pub strategies: Vec<TtlEntry>,
}

#[derive(Debug, Serialize)]
pub struct RateLimitStatus {
    pub enabled: bool,
    pub requests_per_window: u32,
    pub window_seconds: u64,
    pub identifier_type: &'static str,
    pub storage_backend: &'static str,
    pub excluded_paths: Vec<String>,
    pub include_headers: bool,
}

#[derive(Debug, Serialize)]
pub struct RateLimitStatsResponse {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub block_rate: f64,
    pub storage_backend: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub identifier: String,
    pub reset: bool,
}

// ============================================================================
// CACHE HANDLERS
// ============================================================================

/// GET /cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.cache.get_stats())
}

/// POST /cache/clear
pub async fn clear_cache(
    State(state): State<AppState>,
    body: Option<Json<ClearRequest>>,
) -> ApiResult<Json<ClearResponse>> {
    let ClearRequest { pattern, layers } = body.map(|Json(request)| request).unwrap_or_default();

    let report = state.cache.aclear(pattern.as_deref(), &layers).await?;
    info!(pattern = pattern.as_deref().unwrap_or("*"), cleared = report.cleared, "Cache clear requested");
    Ok(Json(ClearResponse::new(pattern, layers, report)))
}

/// DELETE /cache/{pattern}
pub async fn clear_pattern(
    State(state): State<AppState>,
    Path(pattern): Path<String>,
) -> ApiResult<Json<ClearResponse>> {
    let report = state.cache.aclear(Some(&pattern), &Layer::ALL).await?;
    Ok(Json(ClearResponse::new(Some(pattern), default_layers(), report)))
}

/// GET /cache/keys
pub async fn list_keys(State(state): State<AppState>, Query(query): Query<KeysQuery>) -> ApiResult<Json<KeysResponse>> {
    if !(1..=MAX_KEYS_LIMIT).contains(&query.limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_KEYS_LIMIT}, got {}",
            query.limit
        )));
    }

    let keys = state.cache.keys(&query.pattern, query.limit)?;
    Ok(Json(KeysResponse {
        pattern: query.pattern,
        count: keys.len(),
        limit: query.limit,
        keys,
    }))
}

/// GET /cache/health
pub async fn cache_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.cache.health_check().await)
}

/// GET /cache/ttl
pub async fn cache_ttl() -> Json<TtlResponse> {
    Json(TtlResponse { strategies: ttl_table() })
}

// ============================================================================
// RATE-LIMIT HANDLERS
// ============================================================================

/// GET /rate-limit/status
pub async fn rate_limit_status(State(state): State<AppState>) -> Json<RateLimitStatus> {
    let settings = &state.rate_limit;
    Json(RateLimitStatus {
        enabled: settings.enabled,
        requests_per_window: settings.requests,
        window_seconds: settings.window_seconds,
        identifier_type: settings.identifier.as_str(),
        storage_backend: state.limiter.name(),
        excluded_paths: settings.exclude_paths.clone(),
        include_headers: settings.include_headers,
    })
}

/// GET /rate-limit/stats
pub async fn rate_limit_stats(State(state): State<AppState>) -> Json<RateLimitStatsResponse> {
    let stats = state.limiter.stats();
    Json(RateLimitStatsResponse {
        total_requests: stats.total_requests,
        blocked_requests: stats.blocked_requests,
        block_rate: stats.block_rate(),
        storage_backend: state.limiter.name(),
    })
}

/// DELETE /rate-limit/{identifier}
pub async fn reset_rate_limit(State(state): State<AppState>, Path(identifier): Path<String>) -> Json<ResetResponse> {
    let reset = match state.limiter.reset(&identifier).await {
        Ok(reset) => reset,
        Err(e) => {
            warn!(identifier = %identifier, error = %format!("{e:#}"), "Rate limit reset failed");
            false
        }
    };
    info!(identifier = %identifier, reset, "Rate limit reset requested");
    Json(ResetResponse { identifier, reset })
}

// ============================================================================
// LIVENESS
// ============================================================================

/// GET /
pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cache = state.cache.health_check().await;
    Json(serde_json::json!({
        "status": "healthy",
        "cache": cache.status,
        "rate_limiter": state.limiter.name(),
    }))
}

/// All routes, without middleware
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/clear", post(clear_cache))
        .route("/cache/keys", get(list_keys))
        .route("/cache/health", get(cache_health))
        .route("/cache/ttl", get(cache_ttl))
        .route("/cache/{pattern}", delete(clear_pattern))
        .route("/rate-limit/status", get(rate_limit_status))
        .route("/rate-limit/stats", get(rate_limit_stats))
        .route("/rate-limit/{identifier}", delete(reset_rate_limit))
        .with_state(state)
}

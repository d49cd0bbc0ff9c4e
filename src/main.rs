//! Briefing cache server entry point
//!
//! Loads settings, builds the cache manager and rate limiter, and serves the
//! HTTP surface until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use briefing_cache::config::Settings;
use briefing_cache::maintenance::MaintenanceTask;
use briefing_cache::rate_limit::RateLimitService;
use briefing_cache::routes::AppState;
use briefing_cache::{CacheManager, server};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is normal outside development
    let _ = dotenvy::dotenv();

    let settings = Settings::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.server.log_level)),
        )
        .init();

    let cache = Arc::new(CacheManager::initialize(settings.cache.manager_config()).await);
    let limiter = Arc::new(
        RateLimitService::initialize(
            settings.rate_limit.use_redis,
            &settings.rate_limit.redis_url,
            settings.cache.redis_socket_timeout,
        )
        .await,
    );

    let maintenance = MaintenanceTask::spawn(
        Arc::clone(&cache),
        Arc::clone(&limiter),
        settings.rate_limit.window_seconds,
        settings.cache.cleanup_interval,
    );

    let state = AppState::new(Arc::clone(&cache), limiter.clone(), settings.rate_limit.clone());
    let listener = TcpListener::bind((settings.server.host.as_str(), settings.server.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", settings.server.host, settings.server.port))?;

    info!(
        host = %settings.server.host,
        port = settings.server.port,
        cache_backend = %settings.cache.backend,
        rate_limit_enabled = settings.rate_limit.enabled,
        "Starting briefing cache server"
    );

    let served = server::serve(listener, server::app(state), shutdown_signal()).await;

    maintenance.stop().await;
    limiter.shutdown().await;
    cache.shutdown().await;

    served.context("Server error")
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }
}

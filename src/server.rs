//! HTTP Server Assembly
//!
//! Wires the routes, the rate-limit gate and request tracing into one router
//! and serves it until the shutdown future resolves.

use axum::Router;
use axum::middleware::from_fn_with_state;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::{RateLimitGate, rate_limit_middleware};
use crate::routes::{self, AppState};

/// Full application: routes behind the rate-limit gate, traced
pub fn app(state: AppState) -> Router {
    let gate = RateLimitGate::new(Arc::clone(&state.limiter), Arc::clone(&state.rate_limit));

    routes::router(state)
        .layer(from_fn_with_state(gate, rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Serve `app` on `listener` with peer addresses available to the gate
///
/// # Errors
///
/// Returns the I/O error that stopped the accept loop.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Listening");
    }

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
}

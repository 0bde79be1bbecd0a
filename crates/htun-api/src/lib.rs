//! htun-api — the tunnel's HTTP surface.
//!
//!   GET  {base}/auth   Noise IX handshake, Basic-Auth carries message 1
//!   POST {base}/       encrypted packet batches, Basic-Auth carries the lease

pub mod auth;
pub mod error;
pub mod handlers;

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::broadcast;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use htun_core::config::ServerConfig;

pub use error::TunnelError;
pub use handlers::{TunnelSettings, TunnelState};

/// Build the router for the given server settings.
pub fn router(state: TunnelState, server: &ServerConfig) -> Router {
    let base = server.base_path.trim_end_matches('/');

    let data = post(handlers::handle_data).layer(DefaultBodyLimit::max(server.max_body_bytes));
    let mut routes = Router::new()
        .route(
            &format!("{base}/auth"),
            get(handlers::handle_handshake).layer(handshake_timeout(server.handshake_timeout())),
        )
        .route(&format!("{base}/"), data.clone());
    if !base.is_empty() {
        routes = routes.route(base, data);
    }

    routes.layer(TraceLayer::new_for_http()).with_state(state)
}

/// A handshake that runs out of time is refused like any other.
fn handshake_timeout(limit: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::UNAUTHORIZED, limit)
}

/// Serve until a shutdown signal arrives.
pub async fn serve(
    state: TunnelState,
    server: &ServerConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = router(state, server);

    let listener = tokio::net::TcpListener::bind(server.listen).await?;
    tracing::info!(listen = %server.listen, base_path = %server.base_path, "tunnel listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    tracing::info!("tunnel listener stopped");
    Ok(())
}

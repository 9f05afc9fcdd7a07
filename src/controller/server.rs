//! # HTTP Server
//!
//! Prometheus metrics and health probes for the controller pod.
//!
//! - `/metrics` Prometheus text format
//! - `/healthz` liveness, always 200 once the server is up
//! - `/readyz` readiness, 200 once the server is bound

use crate::observability::metrics;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// State shared between the server and the controller
#[derive(Debug, Clone)]
pub struct ServerState {
    pub is_ready: Arc<AtomicBool>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            is_ready: Arc::new(AtomicBool::new(false)),
        }
    }
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::gather_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to gather metrics: {e}"))
        }
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_ready.load(Ordering::Relaxed) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// Build the probe and metrics router
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve; marks the state ready once the listener is bound
pub async fn start_server(port: u16, state: Arc<ServerState>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    state.is_ready.store(true, Ordering::Relaxed);
    axum::serve(listener, router(Arc::clone(&state))).await?;
    Ok(())
}

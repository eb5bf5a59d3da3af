//! Axum HTTP server.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::state::GatewayState;
use crate::webhook::{status_handler, webhook_handler};

/// Build the router with every route the gateway serves.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .route("/webhook", post(webhook_handler))
        .route("/status", post(status_handler))
        .route("/test", get(test_handler).post(test_handler))
        .route("/health", get(health_handler));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Serve on an already-bound listener until Ctrl-C.
pub async fn serve(listener: TcpListener, state: Arc<GatewayState>) -> anyhow::Result<()> {
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Bind `bind:port` and serve.
pub async fn start_server(state: Arc<GatewayState>, bind: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(
        transcriber = state.transcriber.name(),
        signatures = state.validator.is_some(),
        "Gateway listening on {addr}"
    );
    serve(listener, state).await
}

async fn index_handler() -> &'static str {
    "Welcome to the WhatsApp Transcriber!"
}

async fn test_handler() -> &'static str {
    "Test endpoint working!"
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");

    axum::Json(json!({
        "status": "ok",
        "version": version,
        "transcriber": state.transcriber.name(),
        "language": state.language,
        "signature_validation": state.validator.is_some(),
    }))
}

#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

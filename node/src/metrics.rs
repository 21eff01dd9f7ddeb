//! # Metrics Endpoint
//!
//! Serves the application's Prometheus registry at `GET /metrics` when
//! `[instrumentation] prometheus = true` in the settings document.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use kvchain_protocol::metrics::AppMetrics;

/// Router exposing `/metrics` over `metrics`.
pub fn router(metrics: AppMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Renders all series in the Prometheus text format. 500 if encoding fails.
pub async fn metrics_handler(State(metrics): State<AppMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

/// Bind `addr` and serve the metrics router in a background task.
pub async fn spawn_server(
    addr: SocketAddr,
    metrics: AppMetrics,
) -> Result<tokio::task::JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", addr))?;
    tracing::info!("metrics server listening on {}", addr);

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router(metrics)).await {
            tracing::error!("metrics server error: {}", e);
        }
    }))
}

//! HTTP API for health checks, metrics and optimizer reports

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use optimizer_lib::{ComponentStatus, Optimizer};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub optimizer: Arc<Optimizer>,
}

impl AppState {
    pub fn new(optimizer: Arc<Optimizer>) -> Self {
        Self { optimizer }
    }
}

/// Health check endpoint
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.optimizer.health().health().await;
    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

/// Readiness check endpoint
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.optimizer.health().readiness().await;
    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            e.to_string().into_bytes(),
        );
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Full optimization report
async fn report(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.optimizer.report();
    let warnings = report.warnings();
    match serde_json::to_value(&report) {
        Ok(mut body) => {
            body["warnings"] = json!(warnings);
            (StatusCode::OK, Json(body))
        }
        Err(e) => {
            warn!(error = %e, "Failed to serialize report");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

/// Forecast for one horizon, e.g. `/api/v1/forecast/1h`
async fn forecast(
    State(state): State<Arc<AppState>>,
    Path(horizon): Path<String>,
) -> impl IntoResponse {
    match state.optimizer.get_forecast(&horizon) {
        Some(forecast) => (StatusCode::OK, Json(forecast)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no forecast for horizon `{horizon}`") })),
        )
            .into_response(),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/report", get(report))
        .route("/api/v1/forecast/:horizon", get(forecast))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = format!("0.0.0.0:{}", port);

    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

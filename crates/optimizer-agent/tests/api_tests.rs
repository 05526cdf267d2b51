//! Integration tests for the agent API endpoints

#[path = "../src/api.rs"]
mod api;

use api::{create_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use optimizer_lib::{
    collector::StaticProbe,
    health::components,
    models::{CachePriority, LoadObservation},
    Optimizer, OptimizerConfig,
};
use std::sync::Arc;
use tower::ServiceExt;

fn setup_test_app() -> (Router, Arc<AppState>) {
    let probe = Arc::new(StaticProbe::new(20.0, 40.0));
    let optimizer = Optimizer::with_probe(OptimizerConfig::default(), probe).unwrap();
    let state = Arc::new(AppState::new(optimizer));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, state) = setup_test_app();
    state.optimizer.health().register_all().await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    for name in components::ALL {
        assert!(health["components"][name].is_object(), "missing {name}");
    }
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app();
    state.optimizer.health().register_all().await;
    state
        .optimizer
        .health()
        .set_degraded(components::COLLECTOR, "Probe failed 3 times")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    // Degraded still serves traffic
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app();
    state
        .optimizer
        .health()
        .set_unhealthy(components::POOLS, "Pool exhausted")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_lifecycle() {
    let (app, state) = setup_test_app();

    let (status, readiness) = get_json(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    state.optimizer.start().await;
    let (status, readiness) = get_json(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);

    state.optimizer.stop().await;
    let (status, _) = get_json(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_readyz_returns_503_when_ready_but_unhealthy() {
    let (app, state) = setup_test_app();
    state.optimizer.health().set_ready(true).await;
    state
        .optimizer
        .health()
        .set_unhealthy(components::SCHEDULER, "Failed")
        .await;

    let (status, _) = get(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app();
    state.optimizer.metrics().observe_sample_latency(0.001);
    state.optimizer.metrics().observe_sample_latency(0.004);
    state.optimizer.metrics().inc_optimization_action("cpu_high");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("optimizer_sample_latency_seconds_bucket"));
    assert!(metrics_text.contains("optimizer_sample_latency_seconds_count"));
    assert!(metrics_text.contains("optimizer_actions_total"));
    assert!(metrics_text.contains("optimizer_cache_hits_total"));
}

#[tokio::test]
async fn test_report_includes_every_component() {
    let (app, state) = setup_test_app();
    state
        .optimizer
        .cache_put("user:1", serde_json::json!({"name": "a"}), CachePriority::High);
    assert!(state.optimizer.cache_get("user:1").is_some());

    let (status, report) = get_json(app, "/api/v1/report").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["cache_stats"]["hits"], 1);
    assert_eq!(report["queue_depths"]["max_capacity"], 100);
    assert_eq!(report["pools"].as_array().unwrap().len(), 3);
    assert!(report["performance_averages"].is_object());
    assert!(report["forecast_summary"].is_object());
    assert_eq!(report["flags"]["circuit_breaker_open"], false);
    assert!(report["recent_actions"].as_array().unwrap().is_empty());
    assert!(report["warnings"].as_array().unwrap().is_empty());
    assert!(report["generated_at"].is_string());
}

#[tokio::test]
async fn test_forecast_unknown_horizon_is_404() {
    let (app, _state) = setup_test_app();

    let (status, body) = get_json(app, "/api/v1/forecast/1h").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("1h"));
}

#[tokio::test]
async fn test_forecast_returns_refreshed_horizon() {
    let (app, state) = setup_test_app();
    let now = Utc::now();
    let target = now + ChronoDuration::hours(1);
    let forecaster = state.optimizer.forecaster();
    for load in [10.0, 10.0, 10.0] {
        forecaster.record_at(
            target,
            LoadObservation {
                timestamp: target.timestamp(),
                observed_load: load,
                cpu: 30.0,
                memory: 40.0,
            },
        );
    }
    forecaster.refresh(now);

    let (status, forecast) = get_json(app, "/api/v1/forecast/1h").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(forecast["horizon_label"], "1h");
    assert_eq!(forecast["expected_load"], 10.0);
    assert_eq!(forecast["confidence"], 1.0);
    assert_eq!(forecast["sample_count"], 3);
}

//! API client for communicating with an optimizer agent

use anyhow::{Context, Result};
use optimizer_lib::{Forecast, HealthResponse, OptimizationReport, ReadinessResponse};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

/// Non-success response from the agent
#[derive(Debug, Error)]
#[error("API error ({status}): {body}")]
pub struct ApiError {
    pub status: StatusCode,
    pub body: String,
}

/// API client for the optimizer agent
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let (status, value) = self.get_any_status(path).await?;
        value
            .map_err(|body| ApiError { status, body })
            .with_context(|| format!("GET {path}"))
    }

    /// GET that parses the body for every status; non-JSON error bodies are
    /// returned as text
    async fn get_any_status<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<(StatusCode, std::result::Result<T, String>)> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        if status.is_success() {
            let value = response.json().await.context("Failed to parse response")?;
            return Ok((status, Ok(value)));
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str(&body) {
            // Health endpoints carry a full payload with 503
            Ok(value) if status == StatusCode::SERVICE_UNAVAILABLE => Ok((status, Ok(value))),
            _ => Ok((status, Err(body))),
        }
    }

    pub async fn report(&self) -> Result<OptimizationReport> {
        self.get("api/v1/report").await
    }

    /// Forecast for one horizon, `None` when the agent has none yet
    pub async fn forecast(&self, horizon: &str) -> Result<Option<Forecast>> {
        let path = format!("api/v1/forecast/{horizon}");
        match self.get_any_status(&path).await? {
            (_, Ok(forecast)) => Ok(Some(forecast)),
            (StatusCode::NOT_FOUND, Err(_)) => Ok(None),
            (status, Err(body)) => Err(ApiError { status, body }.into()),
        }
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        match self.get_any_status("healthz").await? {
            (_, Ok(health)) => Ok(health),
            (status, Err(body)) => Err(ApiError { status, body }.into()),
        }
    }

    pub async fn readiness(&self) -> Result<ReadinessResponse> {
        match self.get_any_status("readyz").await? {
            (_, Ok(readiness)) => Ok(readiness),
            (status, Err(body)) => Err(ApiError { status, body }.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optimizer_lib::ComponentStatus;

    fn report_body() -> String {
        serde_json::json!({
            "performance_averages": {
                "cpu_percent": 42.5,
                "memory_percent": 61.0,
                "response_time_ms": 120.0,
                "throughput_per_sec": 35.0,
                "error_rate_percent": 0.5,
                "samples": 60
            },
            "cache_stats": {
                "hits": 90, "misses": 10, "evictions": 3, "promotions": 2,
                "expirations": 1, "hit_rate": 0.9, "scale": 1.0, "levels": []
            },
            "queue_depths": {
                "high": 1, "medium": 2, "low": 3, "in_flight": 4,
                "current_load": 10, "max_capacity": 100
            },
            "pool_efficiency": 0.4,
            "pools": [],
            "forecast_summary": {
                "buckets_tracked": 0, "observations": 0, "forecasts": [],
                "peak_expected_load": 0.0, "mean_confidence": 0.0
            },
            "flags": {
                "redundancy_mode": false, "circuit_breaker_open": false,
                "lightweight_first": false, "capacity_boost": 1.0, "cache_scale": 1.0
            },
            "recent_actions": [],
            "generated_at": "2026-01-05T10:00:00Z",
            "warnings": []
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_report_is_parsed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/report")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(report_body())
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let report = client.report().await.unwrap();

        mock.assert_async().await;
        assert_eq!(report.cache_stats.hits, 90);
        assert_eq!(report.queue_depths.queued(), 6);
        assert_eq!(report.performance_averages.samples, 60);
    }

    #[tokio::test]
    async fn test_missing_forecast_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/forecast/3h")
            .with_status(404)
            .with_body(r#"{"error":"no forecast for horizon `3h`"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        assert!(client.forecast("3h").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unhealthy_payload_is_returned() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/healthz")
            .with_status(503)
            .with_body(
                r#"{"status":"unhealthy","components":{"pools":{"status":"unhealthy","message":"exhausted","last_check_timestamp":0}}}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let health = client.health().await.unwrap();
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert_eq!(
            health.components["pools"].message.as_deref(),
            Some("exhausted")
        );
    }

    #[tokio::test]
    async fn test_server_error_surfaces_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/report")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.report().await.unwrap_err();
        let api = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.body, "boom");
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(ApiClient::new("not a url").is_err());
    }
}

//! Health tracking for the optimizer components
//!
//! Component states are derived from live optimizer state by [`assess`] once
//! per sampling cycle and stored in a [`HealthRegistry`]; the agent serves
//! the registry on its liveness and readiness endpoints. Only an unhealthy
//! component fails readiness. Degraded means the optimizer is compensating
//! (last known host readings, a saturated scheduler, an exhausted pool).

use crate::cache::MIN_SCALE;
use crate::pool::PoolStats;
use crate::scheduler::QueueDepths;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Working around a problem
    Degraded,
    Unhealthy,
}

/// One component's latest assessment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix timestamp in seconds
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status across components
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const COLLECTOR: &str = "collector";
    pub const CACHE: &str = "cache";
    pub const SCHEDULER: &str = "scheduler";
    pub const POOLS: &str = "pools";
    pub const FORECASTER: &str = "forecaster";

    pub const ALL: [&str; 5] = [COLLECTOR, CACHE, SCHEDULER, POOLS, FORECASTER];
}

/// Component state gathered once per cycle
#[derive(Debug, Clone)]
pub struct HealthSignals {
    /// Probe failures grew since the previous cycle
    pub probe_failing: bool,
    pub cache_scale: f64,
    pub queue_depths: QueueDepths,
    pub pools: Vec<PoolStats>,
    pub forecast_refreshes: u64,
    pub forecasts: usize,
}

/// Derive every component's health from `signals`
pub fn assess(signals: &HealthSignals) -> Vec<(&'static str, ComponentHealth)> {
    let collector = if signals.probe_failing {
        ComponentHealth::degraded("host metrics unavailable, using last known values")
    } else {
        ComponentHealth::healthy()
    };

    let cache = if signals.cache_scale <= MIN_SCALE + f64::EPSILON {
        ComponentHealth::degraded("cache shrunk to minimum scale")
    } else {
        ComponentHealth::healthy()
    };

    let depths = &signals.queue_depths;
    let scheduler = if depths.in_flight >= depths.max_capacity && depths.queued() > 0 {
        ComponentHealth::degraded(format!(
            "saturated: {} running, {} queued",
            depths.in_flight,
            depths.queued()
        ))
    } else {
        ComponentHealth::healthy()
    };

    let exhausted: Vec<&str> = signals
        .pools
        .iter()
        .filter(|p| p.available == 0)
        .map(|p| p.name.as_str())
        .collect();
    let pools = if exhausted.is_empty() {
        ComponentHealth::healthy()
    } else {
        ComponentHealth::degraded(format!("exhausted: {}", exhausted.join(", ")))
    };

    let forecaster = if signals.forecast_refreshes > 0 && signals.forecasts == 0 {
        ComponentHealth::degraded("no load history for the forecast horizons")
    } else {
        ComponentHealth::healthy()
    };

    vec![
        (components::COLLECTOR, collector),
        (components::CACHE, cache),
        (components::SCHEDULER, scheduler),
        (components::POOLS, pools),
        (components::FORECASTER, forecaster),
    ]
}

#[derive(Debug, Default)]
struct RegistryState {
    components: HashMap<String, ComponentHealth>,
    ready: bool,
}

impl RegistryState {
    fn status(&self) -> ComponentStatus {
        self.components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Shared component health plus the started flag
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every component healthy
    pub async fn register_all(&self) {
        let mut state = self.state.write().await;
        for name in components::ALL {
            state
                .components
                .insert(name.to_string(), ComponentHealth::healthy());
        }
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    /// Store a full assessment under one lock
    pub async fn update_all(&self, assessment: Vec<(&'static str, ComponentHealth)>) {
        let mut state = self.state.write().await;
        for (name, health) in assessment {
            state.components.insert(name.to_string(), health);
        }
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        HealthResponse {
            status: state.status(),
            components: state.components.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let reason = if !state.ready {
            Some("Optimizer not started".to_string())
        } else if state.status() == ComponentStatus::Unhealthy {
            Some("Critical component unhealthy".to_string())
        } else {
            None
        };
        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}

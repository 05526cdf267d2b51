//! Serializable optimization report

use crate::cache::CacheStats;
use crate::collector::PerformanceAverages;
use crate::controller::{AppliedAction, FlagSnapshot};
use crate::forecast::ForecastSummary;
use crate::pool::PoolStats;
use crate::scheduler::QueueDepths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of every optimizer component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub performance_averages: PerformanceAverages,
    pub cache_stats: CacheStats,
    pub queue_depths: QueueDepths,
    /// Mean pool utilization
    pub pool_efficiency: f64,
    pub pools: Vec<PoolStats>,
    pub forecast_summary: ForecastSummary,
    pub flags: FlagSnapshot,
    /// Most recent applied actions, oldest first
    pub recent_actions: Vec<AppliedAction>,
    pub generated_at: DateTime<Utc>,
}

impl OptimizationReport {
    /// Problems worth surfacing alongside the raw numbers
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.flags.circuit_breaker_open {
            warnings.push("circuit breaker open".to_string());
        }
        if self.queue_depths.max_capacity > 0
            && self.queue_depths.current_load >= self.queue_depths.max_capacity
        {
            warnings.push(format!(
                "scheduler saturated ({} of {})",
                self.queue_depths.current_load, self.queue_depths.max_capacity
            ));
        }
        for pool in &self.pools {
            if pool.available == 0 {
                warnings.push(format!("pool `{}` exhausted", pool.name));
            }
        }
        warnings
    }
}

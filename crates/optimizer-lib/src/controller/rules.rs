//! Optimization rules and their trigger conditions

use crate::config::Thresholds;
use serde::{Deserialize, Serialize};

/// A rule the controller can apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationRule {
    CpuHigh,
    MemoryHigh,
    LatencyHigh,
    ErrorRateHigh,
    LoadShedding,
    ForecastPrescale,
}

impl OptimizationRule {
    /// Rules evaluated against every metric sample
    pub const SAMPLE_RULES: [OptimizationRule; 4] = [
        OptimizationRule::CpuHigh,
        OptimizationRule::MemoryHigh,
        OptimizationRule::LatencyHigh,
        OptimizationRule::ErrorRateHigh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationRule::CpuHigh => "cpu_high",
            OptimizationRule::MemoryHigh => "memory_high",
            OptimizationRule::LatencyHigh => "latency_high",
            OptimizationRule::ErrorRateHigh => "error_rate_high",
            OptimizationRule::LoadShedding => "load_shedding",
            OptimizationRule::ForecastPrescale => "forecast_prescale",
        }
    }
}

/// Values the sample rules are evaluated against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleInputs {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// Mean response time over the collector's window
    pub avg_response_time_ms: f64,
    pub error_rate_percent: f64,
}

/// A sample rule whose condition holds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    pub rule: OptimizationRule,
    pub value: f64,
    pub threshold: f64,
}

impl RuleInputs {
    fn reading(&self, rule: OptimizationRule, thresholds: &Thresholds) -> Option<(f64, f64)> {
        match rule {
            OptimizationRule::CpuHigh => Some((self.cpu_percent, thresholds.cpu_high_percent)),
            OptimizationRule::MemoryHigh => {
                Some((self.memory_percent, thresholds.memory_high_percent))
            }
            OptimizationRule::LatencyHigh => {
                Some((self.avg_response_time_ms, thresholds.latency_high_ms))
            }
            OptimizationRule::ErrorRateHigh => {
                Some((self.error_rate_percent, thresholds.error_rate_high_percent))
            }
            OptimizationRule::LoadShedding | OptimizationRule::ForecastPrescale => None,
        }
    }

    /// Whether `rule` is over its threshold
    pub fn fires(&self, rule: OptimizationRule, thresholds: &Thresholds) -> bool {
        self.reading(rule, thresholds)
            .map(|(value, threshold)| value > threshold)
            .unwrap_or(false)
    }

    /// Every sample rule that fires, each independently
    pub fn triggers(&self, thresholds: &Thresholds) -> Vec<Trigger> {
        OptimizationRule::SAMPLE_RULES
            .iter()
            .filter_map(|&rule| {
                let (value, threshold) = self.reading(rule, thresholds)?;
                (value > threshold).then_some(Trigger {
                    rule,
                    value,
                    threshold,
                })
            })
            .collect()
    }
}

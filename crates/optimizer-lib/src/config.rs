//! Optimizer configuration
//!
//! A single options object supplied at construction. Every field has a
//! default, so partial configs (from a file or the environment) deserialize
//! cleanly. [`OptimizerConfig::validate`] is the only place configuration
//! errors can surface.

use crate::cache::EvictionPolicy;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Pool that receives extra capacity when latency is high
pub const CONNECTIONS_POOL: &str = "connections";

/// Pool that receives extra capacity when the scheduler sheds load
pub const WORKERS_POOL: &str = "workers";

/// Configuration of one cache level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheLevelConfig {
    pub ttl_ms: u64,
    pub max_entries: usize,
    pub eviction_policy: EvictionPolicy,
}

impl CacheLevelConfig {
    pub fn new(ttl: Duration, max_entries: usize, eviction_policy: EvictionPolicy) -> Self {
        Self {
            ttl_ms: ttl.as_millis() as u64,
            max_entries,
            eviction_policy,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Definition of a named elastic resource pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolDefinition {
    pub name: String,
    /// Initial capacity
    pub capacity: usize,
    /// Contraction never goes below this floor
    pub min_capacity: usize,
    /// Expansion never goes above this ceiling
    pub max_capacity: usize,
}

impl PoolDefinition {
    pub fn new(name: impl Into<String>, capacity: usize, min: usize, max: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            min_capacity: min,
            max_capacity: max,
        }
    }
}

/// Trigger thresholds for the optimization controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub cpu_high_percent: f64,
    pub memory_high_percent: f64,
    pub latency_high_ms: f64,
    pub error_rate_high_percent: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_high_percent: 80.0,
            memory_high_percent: 85.0,
            latency_high_ms: 200.0,
            error_rate_high_percent: 5.0,
        }
    }
}

/// Full optimizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Name attached to structured log events
    pub node_name: String,
    /// Root of the procfs mount read by the host probe
    pub proc_root: String,

    /// Interval between metric samples
    pub sample_interval_ms: u64,
    /// Capacity of each per-metric circular buffer
    pub metrics_window: usize,

    /// Level-1, level-2 and level-3 cache settings, in that order
    pub cache_levels: [CacheLevelConfig; 3],
    pub cache_sweep_interval_ms: u64,
    /// Hits below level-1 needed before an entry is promoted
    pub promotion_threshold: u64,

    /// Maximum tasks in flight at once
    pub max_capacity: usize,
    pub dispatch_interval_ms: u64,
    pub cpu_admission_limit: f64,
    pub memory_admission_limit: f64,
    /// Fraction of `max_capacity` above which load shedding is requested
    pub load_shed_ratio: f64,

    pub pools: Vec<PoolDefinition>,
    pub rebalance_interval_ms: u64,

    pub pattern_capture_interval_ms: u64,
    pub forecast_interval_ms: u64,
    /// Forecast horizons in hours
    pub forecast_horizons: Vec<u32>,
    /// Observations retained per time-of-week bucket
    pub pattern_history: usize,

    pub thresholds: Thresholds,
    /// Minimum time between two applications of the same rule (0 disables)
    pub action_cooldown_ms: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            node_name: "local".to_string(),
            proc_root: "/proc".to_string(),
            sample_interval_ms: 1_000,
            metrics_window: 60,
            cache_levels: [
                CacheLevelConfig::new(Duration::from_secs(60), 100, EvictionPolicy::Lru),
                CacheLevelConfig::new(Duration::from_secs(300), 1_000, EvictionPolicy::Lfu),
                CacheLevelConfig::new(Duration::from_secs(3_600), 10_000, EvictionPolicy::Ttl),
            ],
            cache_sweep_interval_ms: 5_000,
            promotion_threshold: 5,
            max_capacity: 100,
            dispatch_interval_ms: 100,
            cpu_admission_limit: 85.0,
            memory_admission_limit: 90.0,
            load_shed_ratio: 0.8,
            pools: vec![
                PoolDefinition::new(CONNECTIONS_POOL, 10, 2, 100),
                PoolDefinition::new(WORKERS_POOL, 8, 2, 64),
                PoolDefinition::new("buffers", 50, 10, 500),
            ],
            rebalance_interval_ms: 10_000,
            pattern_capture_interval_ms: 60_000,
            forecast_interval_ms: 300_000,
            forecast_horizons: (1..=6).collect(),
            pattern_history: 50,
            thresholds: Thresholds::default(),
            action_cooldown_ms: 30_000,
        }
    }
}

impl OptimizerConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.cache_sweep_interval_ms)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_millis(self.rebalance_interval_ms)
    }

    pub fn pattern_capture_interval(&self) -> Duration {
        Duration::from_millis(self.pattern_capture_interval_ms)
    }

    pub fn forecast_interval(&self) -> Duration {
        Duration::from_millis(self.forecast_interval_ms)
    }

    pub fn action_cooldown(&self) -> Duration {
        Duration::from_millis(self.action_cooldown_ms)
    }

    /// Check every structural constraint once, before anything is built
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (idx, level) in self.cache_levels.iter().enumerate() {
            if level.ttl_ms == 0 {
                return Err(ConfigError::ZeroCacheLevel {
                    level: idx + 1,
                    field: "ttl",
                });
            }
            if level.max_entries == 0 {
                return Err(ConfigError::ZeroCacheLevel {
                    level: idx + 1,
                    field: "max_entries",
                });
            }
        }

        for idx in 0..2 {
            let lower = &self.cache_levels[idx];
            let upper = &self.cache_levels[idx + 1];
            if lower.ttl_ms >= upper.ttl_ms {
                return Err(ConfigError::CacheLevelOrdering {
                    lower: idx + 1,
                    upper: idx + 2,
                    field: "ttl",
                    lower_value: lower.ttl_ms,
                    upper_value: upper.ttl_ms,
                });
            }
            if lower.max_entries >= upper.max_entries {
                return Err(ConfigError::CacheLevelOrdering {
                    lower: idx + 1,
                    upper: idx + 2,
                    field: "max_entries",
                    lower_value: lower.max_entries as u64,
                    upper_value: upper.max_entries as u64,
                });
            }
        }

        if self.max_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        let intervals = [
            ("sample_interval_ms", self.sample_interval_ms),
            ("cache_sweep_interval_ms", self.cache_sweep_interval_ms),
            ("dispatch_interval_ms", self.dispatch_interval_ms),
            ("rebalance_interval_ms", self.rebalance_interval_ms),
            ("pattern_capture_interval_ms", self.pattern_capture_interval_ms),
            ("forecast_interval_ms", self.forecast_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::ZeroInterval(name));
            }
        }
        if self.metrics_window == 0 {
            return Err(ConfigError::ZeroInterval("metrics_window"));
        }
        if self.pattern_history == 0 {
            return Err(ConfigError::ZeroInterval("pattern_history"));
        }

        let percents = [
            ("cpu_admission_limit", self.cpu_admission_limit),
            ("memory_admission_limit", self.memory_admission_limit),
        ];
        for (name, value) in percents {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    name,
                    value,
                    min: 0.0,
                    max: 100.0,
                });
            }
        }
        if !(self.load_shed_ratio > 0.0 && self.load_shed_ratio <= 1.0) {
            return Err(ConfigError::OutOfRange {
                name: "load_shed_ratio",
                value: self.load_shed_ratio,
                min: 0.0,
                max: 1.0,
            });
        }

        let mut seen = HashSet::new();
        for pool in &self.pools {
            if !seen.insert(pool.name.as_str()) {
                return Err(ConfigError::DuplicatePool(pool.name.clone()));
            }
            if pool.capacity == 0 {
                return Err(ConfigError::InvalidPool {
                    name: pool.name.clone(),
                    reason: "capacity must be greater than zero".to_string(),
                });
            }
            if pool.min_capacity == 0 {
                return Err(ConfigError::InvalidPool {
                    name: pool.name.clone(),
                    reason: "min_capacity must be greater than zero".to_string(),
                });
            }
            if pool.min_capacity > pool.capacity || pool.capacity > pool.max_capacity {
                return Err(ConfigError::InvalidPool {
                    name: pool.name.clone(),
                    reason: format!(
                        "expected min_capacity <= capacity <= max_capacity, got {} <= {} <= {}",
                        pool.min_capacity, pool.capacity, pool.max_capacity
                    ),
                });
            }
        }

        if self.forecast_horizons.is_empty() {
            return Err(ConfigError::NoHorizons);
        }
        if let Some(&bad) = self
            .forecast_horizons
            .iter()
            .find(|h| **h == 0 || **h > 168)
        {
            return Err(ConfigError::InvalidHorizon(bad));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = OptimizerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.metrics_window, 60);
        assert_eq!(config.forecast_horizons, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(config.cache_levels[0].eviction_policy, EvictionPolicy::Lru);
        assert_eq!(config.cache_levels[1].eviction_policy, EvictionPolicy::Lfu);
        assert_eq!(config.cache_levels[2].eviction_policy, EvictionPolicy::Ttl);
    }

    #[test]
    fn test_level_ttl_ordering_rejected() {
        let mut config = OptimizerConfig::default();
        config.cache_levels[1].ttl_ms = config.cache_levels[0].ttl_ms;

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::CacheLevelOrdering { field: "ttl", lower: 1, upper: 2, .. }
        ));
    }

    #[test]
    fn test_level_capacity_ordering_rejected() {
        let mut config = OptimizerConfig::default();
        config.cache_levels[2].max_entries = 500;

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::CacheLevelOrdering { field: "max_entries", lower: 2, upper: 3, .. }
        ));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = OptimizerConfig {
            max_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroCapacity));
    }

    #[test]
    fn test_pool_bounds_rejected() {
        let config = OptimizerConfig {
            pools: vec![PoolDefinition::new("db", 5, 10, 20)],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPool { .. })
        ));

        let config = OptimizerConfig {
            pools: vec![
                PoolDefinition::new("db", 5, 1, 20),
                PoolDefinition::new("db", 5, 1, 20),
            ],
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicatePool("db".to_string()))
        );
    }

    #[test]
    fn test_horizons_validated() {
        let config = OptimizerConfig {
            forecast_horizons: vec![],
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoHorizons));

        let config = OptimizerConfig {
            forecast_horizons: vec![1, 200],
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidHorizon(200)));
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: OptimizerConfig =
            serde_json::from_str(r#"{"max_capacity": 10, "thresholds": {"cpu_high_percent": 70.0}}"#)
                .unwrap();

        assert_eq!(config.max_capacity, 10);
        assert_eq!(config.thresholds.cpu_high_percent, 70.0);
        assert_eq!(config.thresholds.memory_high_percent, 85.0);
        assert_eq!(config.sample_interval_ms, 1_000);
        assert!(config.validate().is_ok());
    }
}

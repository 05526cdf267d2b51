//! Observability infrastructure for the optimizer
//!
//! Provides:
//! - Prometheus metrics (cache counters, queue depths, pool utilization,
//!   task durations, optimization actions, forecast peak)
//! - Structured JSON logging with tracing

use crate::cache::CacheStats;
use crate::models::{Forecast, TaskPriority};
use crate::pool::PoolStats;
use crate::scheduler::QueueDepths;
use prometheus::{
    register_gauge, register_gauge_vec, register_histogram, register_histogram_vec,
    register_int_counter_vec, register_int_gauge, register_int_gauge_vec, Gauge, GaugeVec,
    Histogram, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Buckets for task execution time (in seconds)
const TASK_DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<OptimizerMetricsInner> = OnceLock::new();

struct OptimizerMetricsInner {
    sample_latency_seconds: Histogram,
    probe_errors: IntGauge,
    cache_hits: IntGauge,
    cache_misses: IntGauge,
    cache_evictions: IntGauge,
    cache_promotions: IntGauge,
    cache_entries: IntGaugeVec,
    queue_depth: IntGaugeVec,
    tasks_in_flight: IntGauge,
    task_duration_seconds: HistogramVec,
    task_failures: IntCounterVec,
    pool_utilization: GaugeVec,
    pool_capacity: IntGaugeVec,
    optimization_actions: IntCounterVec,
    forecast_peak_load: Gauge,
}

impl OptimizerMetricsInner {
    fn new() -> Self {
        Self {
            sample_latency_seconds: register_histogram!(
                "optimizer_sample_latency_seconds",
                "Time spent collecting one metrics sample",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sample_latency_seconds"),

            probe_errors: register_int_gauge!(
                "optimizer_probe_errors_total",
                "Total number of failed host metric reads"
            )
            .expect("Failed to register probe_errors"),

            cache_hits: register_int_gauge!(
                "optimizer_cache_hits_total",
                "Total number of cache hits across all levels"
            )
            .expect("Failed to register cache_hits"),

            cache_misses: register_int_gauge!(
                "optimizer_cache_misses_total",
                "Total number of cache misses"
            )
            .expect("Failed to register cache_misses"),

            cache_evictions: register_int_gauge!(
                "optimizer_cache_evictions_total",
                "Total number of entries evicted from any level"
            )
            .expect("Failed to register cache_evictions"),

            cache_promotions: register_int_gauge!(
                "optimizer_cache_promotions_total",
                "Total number of entries promoted to level 1"
            )
            .expect("Failed to register cache_promotions"),

            cache_entries: register_int_gauge_vec!(
                "optimizer_cache_entries",
                "Entries currently resident per cache level",
                &["level"]
            )
            .expect("Failed to register cache_entries"),

            queue_depth: register_int_gauge_vec!(
                "optimizer_queue_depth",
                "Tasks waiting per priority queue",
                &["priority"]
            )
            .expect("Failed to register queue_depth"),

            tasks_in_flight: register_int_gauge!(
                "optimizer_tasks_in_flight",
                "Tasks currently executing"
            )
            .expect("Failed to register tasks_in_flight"),

            task_duration_seconds: register_histogram_vec!(
                "optimizer_task_duration_seconds",
                "Task execution time by priority",
                &["priority"],
                TASK_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register task_duration_seconds"),

            task_failures: register_int_counter_vec!(
                "optimizer_task_failures_total",
                "Tasks that returned an error or panicked",
                &["priority"]
            )
            .expect("Failed to register task_failures"),

            pool_utilization: register_gauge_vec!(
                "optimizer_pool_utilization_ratio",
                "In-use units divided by capacity per pool",
                &["pool"]
            )
            .expect("Failed to register pool_utilization"),

            pool_capacity: register_int_gauge_vec!(
                "optimizer_pool_capacity",
                "Current capacity per pool",
                &["pool"]
            )
            .expect("Failed to register pool_capacity"),

            optimization_actions: register_int_counter_vec!(
                "optimizer_actions_total",
                "Optimization actions applied by rule",
                &["rule"]
            )
            .expect("Failed to register optimization_actions"),

            forecast_peak_load: register_gauge!(
                "optimizer_forecast_peak_load",
                "Highest expected load across current forecasts"
            )
            .expect("Failed to register forecast_peak_load"),
        }
    }
}

/// Optimizer metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct OptimizerMetrics {
    _private: (),
}

impl Default for OptimizerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OptimizerMetricsInner {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new)
    }

    pub fn observe_sample_latency(&self, duration_secs: f64) {
        self.inner().sample_latency_seconds.observe(duration_secs);
    }

    pub fn set_probe_errors(&self, total: u64) {
        self.inner().probe_errors.set(total as i64);
    }

    /// Mirror the cache's own counters
    pub fn set_cache_stats(&self, stats: &CacheStats) {
        let inner = self.inner();
        inner.cache_hits.set(stats.hits as i64);
        inner.cache_misses.set(stats.misses as i64);
        inner.cache_evictions.set(stats.evictions as i64);
        inner.cache_promotions.set(stats.promotions as i64);
        for level in &stats.levels {
            let label = format!("{:?}", level.tier);
            inner
                .cache_entries
                .with_label_values(&[label.as_str()])
                .set(level.entries as i64);
        }
    }

    pub fn set_queue_depths(&self, depths: &QueueDepths) {
        let inner = self.inner();
        inner
            .queue_depth
            .with_label_values(&[TaskPriority::High.as_str()])
            .set(depths.high as i64);
        inner
            .queue_depth
            .with_label_values(&[TaskPriority::Medium.as_str()])
            .set(depths.medium as i64);
        inner
            .queue_depth
            .with_label_values(&[TaskPriority::Low.as_str()])
            .set(depths.low as i64);
        inner.tasks_in_flight.set(depths.in_flight as i64);
    }

    /// Record one finished task
    pub fn observe_task(&self, priority: TaskPriority, duration_secs: f64, success: bool) {
        let inner = self.inner();
        inner
            .task_duration_seconds
            .with_label_values(&[priority.as_str()])
            .observe(duration_secs);
        if !success {
            inner
                .task_failures
                .with_label_values(&[priority.as_str()])
                .inc();
        }
    }

    pub fn set_pool_stats(&self, pools: &[PoolStats]) {
        let inner = self.inner();
        for pool in pools {
            inner
                .pool_utilization
                .with_label_values(&[pool.name.as_str()])
                .set(pool.utilization);
            inner
                .pool_capacity
                .with_label_values(&[pool.name.as_str()])
                .set(pool.capacity as i64);
        }
    }

    pub fn inc_optimization_action(&self, rule: &str) {
        self.inner()
            .optimization_actions
            .with_label_values(&[rule])
            .inc();
    }

    pub fn set_forecast_peak(&self, peak: f64) {
        self.inner().forecast_peak_load.set(peak);
    }
}

/// Structured logger for optimizer events
///
/// Provides consistent JSON-formatted logging for lifecycle changes,
/// optimization actions, task failures and forecasts.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log optimizer startup
    pub fn log_startup(&self, version: &str, components: usize) {
        info!(
            event = "optimizer_started",
            node = %self.node_name,
            version = %version,
            components = components,
            "Adaptive optimizer started"
        );
    }

    /// Log optimizer shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "optimizer_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Adaptive optimizer shutting down"
        );
    }

    /// Log an applied optimization action
    pub fn log_action(&self, rule: &str, trigger_value: f64, threshold: f64, actions: &[String]) {
        info!(
            event = "optimization_applied",
            node = %self.node_name,
            rule = %rule,
            trigger_value = trigger_value,
            threshold = threshold,
            actions = ?actions,
            "Optimization rule fired"
        );
    }

    /// Log a rule that fired but is still cooling down
    pub fn log_action_suppressed(&self, rule: &str, remaining_ms: u64) {
        info!(
            event = "optimization_suppressed",
            node = %self.node_name,
            rule = %rule,
            remaining_ms = remaining_ms,
            "Optimization rule in cooldown"
        );
    }

    /// Log a failed or panicked task
    pub fn log_task_failure(&self, task_id: u64, priority: TaskPriority, error: &str) {
        warn!(
            event = "task_failed",
            node = %self.node_name,
            task_id = task_id,
            priority = %priority.as_str(),
            error = %error,
            "Task failed"
        );
    }

    /// Log a forecast refresh
    pub fn log_forecasts(&self, forecasts: &[Forecast], peak: f64) {
        info!(
            event = "forecast_refreshed",
            node = %self.node_name,
            forecasts = forecasts.len(),
            peak_expected_load = peak,
            "Load forecasts refreshed"
        );
    }

    /// Log a change of a control flag
    pub fn log_flag_change(&self, flag: &str, enabled: bool) {
        if enabled {
            warn!(
                event = "control_flag",
                node = %self.node_name,
                flag = %flag,
                enabled = true,
                "Control flag raised"
            );
        } else {
            info!(
                event = "control_flag",
                node = %self.node_name,
                flag = %flag,
                enabled = false,
                "Control flag cleared"
            );
        }
    }
}

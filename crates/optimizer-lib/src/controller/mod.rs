//! Optimization controller
//!
//! Evaluates the rule set after every metric sample, on scheduler load
//! signals and after forecast refreshes, and applies the matching actions to
//! the cache, scheduler and pools. Each rule has its own cooldown so a
//! sustained condition is acted on at most once per cooldown period.

mod rules;

pub use rules::{OptimizationRule, RuleInputs, Trigger};

use crate::cache::{CacheControl, CacheTier};
use crate::collector::MetricsCollector;
use crate::config::{Thresholds, CONNECTIONS_POOL, WORKERS_POOL};
use crate::forecast::ForecastSummary;
use crate::models::{MetricKind, MetricSample};
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::pool::ResourcePoolManager;
use crate::scheduler::{LightweightReason, LoadSignal, Scheduler};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Applied actions kept for reports
pub const ACTION_HISTORY_LIMIT: usize = 50;

/// Cache scale applied under CPU pressure
pub const CPU_CACHE_SCALE: f64 = 0.8;

/// Cache scale applied when latency is high
pub const LATENCY_CACHE_SCALE: f64 = 1.2;

/// Pool growth used by latency, load-shedding and forecast actions
pub const POOL_EXPANSION: f64 = 1.2;

/// Share of leases reclaimed under memory pressure
pub const MEMORY_RECLAIM_FRACTION: f64 = 0.1;

/// Scheduler capacity boost ahead of a forecast peak
pub const FORECAST_CAPACITY_BOOST: f64 = 1.2;

/// Peak expected load, relative to base capacity, that triggers pre-scaling
pub const FORECAST_PEAK_RATIO: f64 = 0.8;

/// Flags read by the execution layer
#[derive(Debug, Default)]
pub struct ControlFlags {
    redundancy_mode: AtomicBool,
    circuit_breaker_open: AtomicBool,
}

impl ControlFlags {
    pub fn redundancy_mode(&self) -> bool {
        self.redundancy_mode.load(Ordering::Acquire)
    }

    pub fn circuit_breaker_open(&self) -> bool {
        self.circuit_breaker_open.load(Ordering::Acquire)
    }

    /// Returns true if either flag changed
    fn set_error_mode(&self, enabled: bool) -> bool {
        let a = self.redundancy_mode.swap(enabled, Ordering::AcqRel);
        let b = self.circuit_breaker_open.swap(enabled, Ordering::AcqRel);
        a != enabled || b != enabled
    }
}

/// Point-in-time view of every runtime switch the controller owns
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlagSnapshot {
    pub redundancy_mode: bool,
    pub circuit_breaker_open: bool,
    pub lightweight_first: bool,
    pub capacity_boost: f64,
    pub cache_scale: f64,
}

/// One applied rule, kept in the action history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedAction {
    pub rule: OptimizationRule,
    pub trigger_value: f64,
    pub threshold: f64,
    pub actions: Vec<String>,
    /// Unix timestamp in milliseconds
    pub applied_at: i64,
}

/// Applies optimization rules to the running components
pub struct OptimizationController {
    thresholds: Thresholds,
    cooldown: Duration,
    cache: Arc<dyn CacheControl>,
    scheduler: Arc<Scheduler>,
    pools: Arc<ResourcePoolManager>,
    collector: Arc<MetricsCollector>,
    flags: Arc<ControlFlags>,
    last_applied: Mutex<HashMap<OptimizationRule, Instant>>,
    history: Mutex<VecDeque<AppliedAction>>,
    metrics: OptimizerMetrics,
    logger: StructuredLogger,
}

impl OptimizationController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        thresholds: Thresholds,
        cooldown: Duration,
        cache: Arc<dyn CacheControl>,
        scheduler: Arc<Scheduler>,
        pools: Arc<ResourcePoolManager>,
        collector: Arc<MetricsCollector>,
        metrics: OptimizerMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            thresholds,
            cooldown,
            cache,
            scheduler,
            pools,
            collector,
            flags: Arc::new(ControlFlags::default()),
            last_applied: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(ACTION_HISTORY_LIMIT)),
            metrics,
            logger,
        }
    }

    pub fn control_flags(&self) -> Arc<ControlFlags> {
        Arc::clone(&self.flags)
    }

    pub fn flags(&self) -> FlagSnapshot {
        FlagSnapshot {
            redundancy_mode: self.flags.redundancy_mode(),
            circuit_breaker_open: self.flags.circuit_breaker_open(),
            lightweight_first: self.scheduler.lightweight_first(),
            capacity_boost: self.scheduler.capacity_boost(),
            cache_scale: self.cache.stats().scale,
        }
    }

    /// Applied actions, oldest first
    pub fn history(&self) -> Vec<AppliedAction> {
        self.history.lock().iter().cloned().collect()
    }

    /// Evaluate the sample rules and apply those that fire
    pub fn evaluate(&self, sample: &MetricSample) -> Vec<AppliedAction> {
        let inputs = RuleInputs {
            cpu_percent: sample.cpu_percent,
            memory_percent: sample.memory_percent,
            avg_response_time_ms: self.collector.average(MetricKind::ResponseTime),
            error_rate_percent: sample.error_rate_percent,
        };

        self.relax(&inputs);

        inputs
            .triggers(&self.thresholds)
            .into_iter()
            .filter_map(|trigger| {
                self.try_apply(trigger.rule, trigger.value, trigger.threshold, || {
                    self.act(trigger.rule)
                })
            })
            .collect()
    }

    /// Undo modes whose condition no longer holds
    fn relax(&self, inputs: &RuleInputs) {
        if !inputs.fires(OptimizationRule::CpuHigh, &self.thresholds)
            && self.scheduler.lightweight_first_for(LightweightReason::CpuPressure)
        {
            self.scheduler
                .set_lightweight_first(LightweightReason::CpuPressure, false);
        }

        if self.scheduler.lightweight_first_for(LightweightReason::LoadShedding)
            && !self.scheduler.load_above_shed_ratio()
        {
            self.scheduler
                .set_lightweight_first(LightweightReason::LoadShedding, false);
        }

        if !inputs.fires(OptimizationRule::ErrorRateHigh, &self.thresholds)
            && self.flags.set_error_mode(false)
        {
            self.logger.log_flag_change("redundancy_mode", false);
            self.logger.log_flag_change("circuit_breaker_open", false);
        }
    }

    fn act(&self, rule: OptimizationRule) -> Vec<String> {
        match rule {
            OptimizationRule::CpuHigh => {
                let scale = self.cache.scale(CPU_CACHE_SCALE);
                self.scheduler
                    .set_lightweight_first(LightweightReason::CpuPressure, true);
                vec![
                    format!("cache scaled to {:.2}", scale),
                    "lightweight-first dispatch on".to_string(),
                ]
            }
            OptimizationRule::MemoryHigh => {
                let l2 = self.cache.force_evict(CacheTier::L2);
                let l3 = self.cache.force_evict(CacheTier::L3);
                let reclaimed = self.pools.reclaim(MEMORY_RECLAIM_FRACTION);
                vec![
                    format!("evicted {} level-2 entries", l2),
                    format!("evicted {} level-3 entries", l3),
                    format!("reclaimed {} pool leases", reclaimed),
                ]
            }
            OptimizationRule::LatencyHigh => {
                let scale = self.cache.scale(LATENCY_CACHE_SCALE);
                let mut actions = vec![format!("cache scaled to {:.2}", scale)];
                actions.push(self.expand_pool(CONNECTIONS_POOL));
                actions
            }
            OptimizationRule::ErrorRateHigh => {
                if self.flags.set_error_mode(true) {
                    self.logger.log_flag_change("redundancy_mode", true);
                    self.logger.log_flag_change("circuit_breaker_open", true);
                }
                vec![
                    "redundancy mode on".to_string(),
                    "circuit breaker open".to_string(),
                ]
            }
            OptimizationRule::LoadShedding => {
                self.scheduler
                    .set_lightweight_first(LightweightReason::LoadShedding, true);
                vec![
                    "lightweight-first dispatch on".to_string(),
                    self.expand_pool(WORKERS_POOL),
                ]
            }
            OptimizationRule::ForecastPrescale => {
                self.scheduler.apply_capacity_boost(FORECAST_CAPACITY_BOOST);
                let expanded = self.pools.expand_all(POOL_EXPANSION);
                vec![
                    format!("capacity boost x{:.1}", FORECAST_CAPACITY_BOOST),
                    format!("pre-expanded {} pools", expanded.len()),
                ]
            }
        }
    }

    fn expand_pool(&self, name: &str) -> String {
        match self.pools.expand(name, POOL_EXPANSION) {
            Ok(Some(change)) => format!("{} pool {} -> {}", name, change.from, change.to),
            Ok(None) => format!("{} pool at ceiling", name),
            Err(e) => {
                debug!(pool = name, error = %e, "Pool not configured, skipping expansion");
                format!("{} pool not configured", name)
            }
        }
    }

    /// Apply `rule` through `act` unless it is cooling down
    fn try_apply<F>(&self, rule: OptimizationRule, value: f64, threshold: f64, act: F) -> Option<AppliedAction>
    where
        F: FnOnce() -> Vec<String>,
    {
        let now = Instant::now();
        {
            let mut last = self.last_applied.lock();
            if let Some(at) = last.get(&rule) {
                let elapsed = now.saturating_duration_since(*at);
                if !self.cooldown.is_zero() && elapsed < self.cooldown {
                    self.logger.log_action_suppressed(
                        rule.as_str(),
                        (self.cooldown - elapsed).as_millis() as u64,
                    );
                    return None;
                }
            }
            last.insert(rule, now);
        }

        let action = AppliedAction {
            rule,
            trigger_value: value,
            threshold,
            actions: act(),
            applied_at: chrono::Utc::now().timestamp_millis(),
        };

        self.logger
            .log_action(rule.as_str(), value, threshold, &action.actions);
        self.metrics.inc_optimization_action(rule.as_str());

        let mut history = self.history.lock();
        if history.len() >= ACTION_HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(action.clone());
        Some(action)
    }

    /// Handle a scheduler load signal
    pub fn on_load_signal(&self, signal: LoadSignal) -> Option<AppliedAction> {
        self.try_apply(
            OptimizationRule::LoadShedding,
            signal.ratio(),
            self.scheduler.load_shed_ratio(),
            || self.act(OptimizationRule::LoadShedding),
        )
    }

    /// Pre-scale ahead of the forecast peak, or drop a stale boost
    pub fn on_forecast(&self, summary: &ForecastSummary) -> Option<AppliedAction> {
        self.metrics.set_forecast_peak(summary.peak_expected_load);
        self.logger
            .log_forecasts(&summary.forecasts, summary.peak_expected_load);

        let threshold = FORECAST_PEAK_RATIO * self.scheduler.base_capacity() as f64;
        if summary.peak_expected_load > threshold {
            return self.try_apply(
                OptimizationRule::ForecastPrescale,
                summary.peak_expected_load,
                threshold,
                || self.act(OptimizationRule::ForecastPrescale),
            );
        }

        if self.scheduler.capacity_boost() > 1.0 {
            info!(
                peak_expected_load = summary.peak_expected_load,
                threshold = threshold,
                "Forecast peak passed, clearing capacity boost"
            );
            self.scheduler.clear_capacity_boost();
        }
        None
    }

    /// Consume samples, load signals and forecasts until shutdown
    pub async fn run(
        self: Arc<Self>,
        mut samples: broadcast::Receiver<MetricSample>,
        mut load_signals: mpsc::Receiver<LoadSignal>,
        mut forecasts: broadcast::Receiver<ForecastSummary>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            cooldown_ms = self.cooldown.as_millis() as u64,
            "Starting optimization controller"
        );

        let mut signals_open = true;
        let mut forecasts_open = true;

        loop {
            tokio::select! {
                sample = samples.recv() => match sample {
                    Ok(sample) => {
                        self.evaluate(&sample);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Controller lagging behind samples");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                signal = load_signals.recv(), if signals_open => match signal {
                    Some(signal) => {
                        self.on_load_signal(signal);
                    }
                    None => signals_open = false,
                },
                summary = forecasts.recv(), if forecasts_open => match summary {
                    Ok(summary) => {
                        self.on_forecast(&summary);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => forecasts_open = false,
                },
                _ = shutdown.recv() => {
                    info!("Shutting down optimization controller");
                    break;
                }
            }
        }
    }
}

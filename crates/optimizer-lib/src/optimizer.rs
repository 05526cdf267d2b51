//! The optimizer handle
//!
//! Wires the collector, cache, scheduler, pools, forecaster and controller
//! together and owns their background loops. Configuration is validated once
//! in [`Optimizer::new`]; nothing after construction returns a configuration
//! error.

use crate::cache::TieredCache;
use crate::collector::{create_probe, MetricsCollector, SystemProbe, WorkloadTracker};
use crate::config::OptimizerConfig;
use crate::controller::{ControlFlags, FlagSnapshot, OptimizationController};
use crate::error::{ConfigError, PoolError};
use crate::forecast::LoadForecaster;
use crate::health::{assess, HealthRegistry, HealthSignals};
use crate::models::{CachePriority, Forecast, MetricSample, TaskCompletion};
use crate::observability::{OptimizerMetrics, StructuredLogger};
use crate::pool::{ResourceHandle, ResourcePoolManager};
use crate::report::OptimizationReport;
use crate::scheduler::{AdmissionLimits, Scheduler, TaskSpec};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Background loops spawned by [`Optimizer::start`]
const COMPONENT_LOOPS: usize = 8;

/// Cache holding JSON values, as exposed by the optimizer
pub type OptimizerCache = TieredCache<Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

/// Handle to a running (or ready to run) optimizer
pub struct Optimizer {
    config: OptimizerConfig,
    workload: Arc<WorkloadTracker>,
    collector: Arc<MetricsCollector>,
    cache: Arc<OptimizerCache>,
    scheduler: Arc<Scheduler>,
    pools: Arc<ResourcePoolManager>,
    forecaster: Arc<LoadForecaster>,
    controller: Arc<OptimizationController>,
    health: HealthRegistry,
    metrics: OptimizerMetrics,
    logger: StructuredLogger,
    shutdown_tx: broadcast::Sender<()>,
    lifecycle: Mutex<Lifecycle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Optimizer {
    /// Validate `config` and build every component, reading host metrics
    /// from procfs when available
    pub fn new(config: OptimizerConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let probe = create_probe(Path::new(&config.proc_root));
        Ok(Self::build(config, probe))
    }

    /// Like [`new`](Self::new) with an explicit host probe
    pub fn with_probe(
        config: OptimizerConfig,
        probe: Arc<dyn SystemProbe>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        Ok(Self::build(config, probe))
    }

    fn build(config: OptimizerConfig, probe: Arc<dyn SystemProbe>) -> Arc<Self> {
        let metrics = OptimizerMetrics::new();
        let logger = StructuredLogger::new(config.node_name.clone());

        let workload = Arc::new(WorkloadTracker::new());
        let collector = Arc::new(MetricsCollector::new(
            probe,
            workload.clone(),
            config.metrics_window,
        ));
        let cache = Arc::new(TieredCache::new(
            config.cache_levels.clone(),
            config.promotion_threshold,
        ));
        let scheduler = Arc::new(Scheduler::new(
            AdmissionLimits::from(&config),
            config.load_shed_ratio,
            collector.clone(),
            workload.clone(),
            metrics.clone(),
        ));
        let pools = Arc::new(ResourcePoolManager::new(&config.pools, metrics.clone()));
        let forecaster = Arc::new(LoadForecaster::new(
            config.forecast_horizons.clone(),
            config.pattern_history,
        ));
        let controller = Arc::new(OptimizationController::new(
            config.thresholds.clone(),
            config.action_cooldown(),
            cache.clone(),
            scheduler.clone(),
            pools.clone(),
            collector.clone(),
            metrics.clone(),
            logger.clone(),
        ));

        let (shutdown_tx, _) = broadcast::channel(1);

        Arc::new(Self {
            config,
            workload,
            collector,
            cache,
            scheduler,
            pools,
            forecaster,
            controller,
            health: HealthRegistry::new(),
            metrics,
            logger,
            shutdown_tx,
            lifecycle: Mutex::new(Lifecycle::Idle),
            tasks: Mutex::new(Vec::with_capacity(COMPONENT_LOOPS)),
        })
    }

    /// Spawn every background loop
    ///
    /// Calling it again while running is a no-op; a stopped optimizer stays
    /// stopped.
    pub async fn start(self: &Arc<Self>) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle != Lifecycle::Idle {
                return;
            }
            *lifecycle = Lifecycle::Running;
        }

        self.health.register_all().await;

        let config = &self.config;
        let load_signals = match self.scheduler.take_load_signals() {
            Some(rx) => rx,
            None => {
                warn!("Load signal receiver already taken, load shedding disabled");
                tokio::sync::mpsc::channel(1).1
            }
        };

        let handles = vec![
            tokio::spawn(self.collector.clone().run(
                config.sample_interval(),
                self.metrics.clone(),
                self.shutdown_tx.subscribe(),
            )),
            tokio::spawn(self.controller.clone().run(
                self.collector.subscribe(),
                load_signals,
                self.forecaster.subscribe(),
                self.shutdown_tx.subscribe(),
            )),
            tokio::spawn(self.clone().publish_telemetry(
                self.collector.subscribe(),
                self.shutdown_tx.subscribe(),
            )),
            tokio::spawn(
                self.cache
                    .clone()
                    .run(config.cache_sweep_interval(), self.shutdown_tx.subscribe()),
            ),
            tokio::spawn(
                self.pools
                    .clone()
                    .run(config.rebalance_interval(), self.shutdown_tx.subscribe()),
            ),
            tokio::spawn(
                self.scheduler
                    .clone()
                    .run(config.dispatch_interval(), self.shutdown_tx.subscribe()),
            ),
            tokio::spawn(self.forecaster.clone().run_capture(
                self.scheduler.clone(),
                self.collector.clone(),
                config.pattern_capture_interval(),
                self.shutdown_tx.subscribe(),
            )),
            tokio::spawn(
                self.forecaster
                    .clone()
                    .run_refresh(config.forecast_interval(), self.shutdown_tx.subscribe()),
            ),
        ];
        *self.tasks.lock() = handles;

        self.health.set_ready(true).await;
        self.logger
            .log_startup(env!("CARGO_PKG_VERSION"), COMPONENT_LOOPS);
    }

    /// Signal every loop to stop and wait for them
    ///
    /// Queued tasks are left unstarted; running tasks are not cancelled.
    pub async fn stop(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle != Lifecycle::Running {
                return;
            }
            *lifecycle = Lifecycle::Stopped;
        }

        self.health.set_ready(false).await;
        let _ = self.shutdown_tx.send(());

        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Component loop ended abnormally");
            }
        }

        self.logger.log_shutdown("stop requested");
    }

    pub fn is_running(&self) -> bool {
        *self.lifecycle.lock() == Lifecycle::Running
    }

    /// Mirror component state into Prometheus and the health registry
    async fn publish_telemetry(
        self: Arc<Self>,
        mut samples: broadcast::Receiver<MetricSample>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut probe_failures = self.collector.probe_failures();

        loop {
            tokio::select! {
                sample = samples.recv() => {
                    if let Err(broadcast::error::RecvError::Closed) = sample {
                        break;
                    }
                    let failures = self.collector.probe_failures();
                    self.metrics.set_probe_errors(failures);

                    let cache_stats = self.cache.stats();
                    let depths = self.scheduler.depths();
                    let pools = self.pools.stats();
                    self.metrics.set_cache_stats(&cache_stats);
                    self.metrics.set_queue_depths(&depths);
                    self.metrics.set_pool_stats(&pools);

                    let signals = HealthSignals {
                        probe_failing: failures > probe_failures,
                        cache_scale: cache_stats.scale,
                        queue_depths: depths,
                        pools,
                        forecast_refreshes: self.forecaster.refreshes(),
                        forecasts: self.forecaster.forecasts().len(),
                    };
                    self.health.update_all(assess(&signals)).await;
                    probe_failures = failures;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down telemetry loop");
                    break;
                }
            }
        }
    }

    /// Take one metric sample now and evaluate the rules against it
    pub async fn collect_metrics(&self) -> MetricSample {
        let sample = self.collector.sample().await;
        if !self.is_running() {
            // The controller loop only sees samples while running
            self.controller.evaluate(&sample);
        }
        sample
    }

    pub fn cache_get(&self, key: &str) -> Option<Value> {
        self.cache.get(key)
    }

    pub fn cache_put(&self, key: impl Into<String>, value: Value, priority: CachePriority) {
        self.cache.put(key, value, priority);
    }

    pub fn enqueue_task(&self, spec: TaskSpec) -> u64 {
        self.scheduler.enqueue(spec)
    }

    pub fn subscribe_completions(&self) -> broadcast::Receiver<TaskCompletion> {
        self.scheduler.subscribe()
    }

    pub async fn acquire_resource(&self, pool: &str) -> Result<ResourceHandle, PoolError> {
        self.pools.acquire(pool).await
    }

    pub fn try_acquire_resource(&self, pool: &str) -> Result<Option<ResourceHandle>, PoolError> {
        self.pools.try_acquire(pool)
    }

    pub fn release_resource(&self, pool: &str, handle: ResourceHandle) -> Result<(), PoolError> {
        self.pools.release(pool, handle)
    }

    pub fn get_forecast(&self, horizon_label: &str) -> Option<Forecast> {
        self.forecaster.get(horizon_label)
    }

    pub fn flags(&self) -> FlagSnapshot {
        self.controller.flags()
    }

    /// Shared flags for the execution layer
    pub fn control_flags(&self) -> Arc<ControlFlags> {
        self.controller.control_flags()
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn metrics(&self) -> &OptimizerMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<OptimizerCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn pools(&self) -> &Arc<ResourcePoolManager> {
        &self.pools
    }

    pub fn forecaster(&self) -> &Arc<LoadForecaster> {
        &self.forecaster
    }

    pub fn controller(&self) -> &Arc<OptimizationController> {
        &self.controller
    }

    pub fn workload(&self) -> &Arc<WorkloadTracker> {
        &self.workload
    }

    /// Snapshot of every component
    pub fn report(&self) -> OptimizationReport {
        OptimizationReport {
            performance_averages: self.collector.averages(),
            cache_stats: self.cache.stats(),
            queue_depths: self.scheduler.depths(),
            pool_efficiency: self.pools.efficiency(),
            pools: self.pools.stats(),
            forecast_summary: self.forecaster.summary(),
            flags: self.controller.flags(),
            recent_actions: self.controller.history(),
            generated_at: chrono::Utc::now(),
        }
    }
}

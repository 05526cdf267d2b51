//! Priority scheduler with resource-aware admission control
//!
//! Tasks wait in three FIFO queues (high, medium, low). The dispatcher drains
//! them strictly by priority for as long as the host has headroom and fewer
//! than `max_capacity` tasks are running. Each job runs in its own tokio task
//! so a failure or panic only affects that task's completion event.

mod task;

pub use task::{TaskJob, TaskSpec};

use crate::collector::{MetricsCollector, WorkloadTracker};
use crate::config::OptimizerConfig;
use crate::error::TaskError;
use crate::models::{TaskCompletion, TaskCost, TaskPriority};
use crate::observability::OptimizerMetrics;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use task::QueuedTask;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

/// Pending load signals kept for the controller
const LOAD_SIGNAL_BUFFER: usize = 16;

/// Completion events kept for slow subscribers
const COMPLETION_BUFFER: usize = 1024;

/// Runtime-adjustable admission limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdmissionLimits {
    pub cpu_limit: f64,
    pub memory_limit: f64,
    pub max_capacity: usize,
}

impl From<&OptimizerConfig> for AdmissionLimits {
    fn from(config: &OptimizerConfig) -> Self {
        Self {
            cpu_limit: config.cpu_admission_limit,
            memory_limit: config.memory_admission_limit,
            max_capacity: config.max_capacity,
        }
    }
}

/// Sent to the controller when queued plus running work nears capacity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadSignal {
    pub current_load: usize,
    pub max_capacity: usize,
    /// Unix timestamp in milliseconds
    pub at: i64,
}

impl LoadSignal {
    pub fn ratio(&self) -> f64 {
        if self.max_capacity == 0 {
            return 0.0;
        }
        self.current_load as f64 / self.max_capacity as f64
    }
}

/// Snapshot of the scheduler's queues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepths {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub in_flight: usize,
    /// Queued plus in-flight tasks
    pub current_load: usize,
    /// Effective capacity, including any boost
    pub max_capacity: usize,
}

impl QueueDepths {
    pub fn queued(&self) -> usize {
        self.high + self.medium + self.low
    }
}

/// Why lightweight-first dispatch is on
///
/// Each reason is raised and cleared on its own; dispatch prefers light
/// tasks while any reason holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightweightReason {
    CpuPressure,
    LoadShedding,
}

impl LightweightReason {
    fn bit(self) -> u8 {
        match self {
            LightweightReason::CpuPressure => 0b01,
            LightweightReason::LoadShedding => 0b10,
        }
    }
}

struct LimitState {
    limits: AdmissionLimits,
    boost: f64,
}

impl LimitState {
    fn effective_capacity(&self) -> usize {
        ((self.limits.max_capacity as f64 * self.boost).round() as usize).max(1)
    }
}

/// Three-queue priority scheduler
pub struct Scheduler {
    queues: [Mutex<VecDeque<QueuedTask>>; 3],
    limits: RwLock<LimitState>,
    load_shed_ratio: f64,
    lightweight_reasons: AtomicU8,
    next_id: AtomicU64,
    in_flight: AtomicUsize,
    current_load: AtomicUsize,
    dispatch_lock: Mutex<()>,
    notify: Notify,
    completion_tx: broadcast::Sender<TaskCompletion>,
    load_tx: mpsc::Sender<LoadSignal>,
    load_rx: Mutex<Option<mpsc::Receiver<LoadSignal>>>,
    collector: Arc<MetricsCollector>,
    workload: Arc<WorkloadTracker>,
    metrics: OptimizerMetrics,
}

impl Scheduler {
    pub fn new(
        limits: AdmissionLimits,
        load_shed_ratio: f64,
        collector: Arc<MetricsCollector>,
        workload: Arc<WorkloadTracker>,
        metrics: OptimizerMetrics,
    ) -> Self {
        let (completion_tx, _) = broadcast::channel(COMPLETION_BUFFER);
        let (load_tx, load_rx) = mpsc::channel(LOAD_SIGNAL_BUFFER);

        Self {
            queues: std::array::from_fn(|_| Mutex::new(VecDeque::new())),
            limits: RwLock::new(LimitState { limits, boost: 1.0 }),
            load_shed_ratio,
            lightweight_reasons: AtomicU8::new(0),
            next_id: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            current_load: AtomicUsize::new(0),
            dispatch_lock: Mutex::new(()),
            notify: Notify::new(),
            completion_tx,
            load_tx,
            load_rx: Mutex::new(Some(load_rx)),
            collector,
            workload,
            metrics,
        }
    }

    /// Queue a task and wake the dispatcher
    pub fn enqueue(&self, spec: TaskSpec) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let task = spec.into_queued(id, Instant::now());
        let priority = task.priority;

        debug!(
            task_id = id,
            priority = priority.as_str(),
            name = task.name.as_deref().unwrap_or("-"),
            "Task enqueued"
        );
        // Counted before it becomes visible to the dispatcher
        let load = self.current_load.fetch_add(1, Ordering::AcqRel) + 1;
        self.queues[priority.queue_index()].lock().push_back(task);

        self.signal_load(load);
        self.notify.notify_one();
        id
    }

    /// Whether one more task may start now
    pub fn can_admit(&self) -> bool {
        let state = self.limits.read();
        let (cpu, memory) = self
            .collector
            .latest()
            .map(|s| (s.cpu_percent, s.memory_percent))
            .unwrap_or((0.0, 0.0));

        cpu < state.limits.cpu_limit
            && memory < state.limits.memory_limit
            && self.in_flight.load(Ordering::Acquire) < state.effective_capacity()
    }

    /// Start as many queued tasks as admission allows
    ///
    /// Must be called from within a tokio runtime. Returns the number of
    /// tasks started.
    pub fn dispatch_ready(self: &Arc<Self>) -> usize {
        let _guard = self.dispatch_lock.lock();
        let mut dispatched = 0;

        while self.can_admit() {
            let Some(task) = self.pop_next() else {
                break;
            };
            self.in_flight.fetch_add(1, Ordering::AcqRel);
            self.spawn_task(task);
            dispatched += 1;
        }

        if dispatched > 0 {
            self.metrics.set_queue_depths(&self.depths());
        }
        dispatched
    }

    /// Next task in strict priority order
    fn pop_next(&self) -> Option<QueuedTask> {
        let lightweight = self.lightweight_first();

        for priority in TaskPriority::DISPATCH_ORDER {
            let mut queue = self.queues[priority.queue_index()].lock();
            if queue.is_empty() {
                continue;
            }
            if lightweight {
                if let Some(pos) = queue.iter().position(|t| t.cost == TaskCost::Light) {
                    return queue.remove(pos);
                }
            }
            return queue.pop_front();
        }
        None
    }

    fn spawn_task(self: &Arc<Self>, task: QueuedTask) {
        let scheduler = Arc::clone(self);
        let QueuedTask {
            id,
            priority,
            enqueued_at,
            job,
            ..
        } = task;

        debug!(
            task_id = id,
            priority = priority.as_str(),
            waited_ms = enqueued_at.elapsed().as_millis() as u64,
            "Dispatching task"
        );

        tokio::spawn(async move {
            let started = Instant::now();
            // Inner spawn isolates panics from the bookkeeping below
            let outcome = match tokio::spawn(job).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(TaskError::Failed(format!("{:#}", e))),
                Err(e) if e.is_panic() => Err(TaskError::Panicked(panic_message(e.into_panic()))),
                Err(e) => Err(TaskError::Failed(e.to_string())),
            };
            scheduler.finish(id, priority, started.elapsed(), outcome);
        });
    }

    fn finish(&self, id: u64, priority: TaskPriority, elapsed: Duration, outcome: Result<(), TaskError>) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.current_load.fetch_sub(1, Ordering::AcqRel);

        let duration_ms = elapsed.as_millis() as u64;
        let success = outcome.is_ok();
        self.workload.record(duration_ms, success);
        self.metrics
            .observe_task(priority, elapsed.as_secs_f64(), success);

        let error = outcome.err().map(|e| e.to_string());
        if let Some(ref message) = error {
            warn!(
                task_id = id,
                priority = priority.as_str(),
                error = %message,
                "Task failed"
            );
        }

        // No subscribers is fine
        let _ = self.completion_tx.send(TaskCompletion {
            task_id: id,
            priority,
            success,
            duration_ms,
            error,
        });
        self.notify.notify_one();
    }

    fn above_shed_ratio(&self, load: usize, capacity: usize) -> bool {
        load as f64 > self.load_shed_ratio * capacity as f64
    }

    /// Whether queued plus running work is past the shed ratio right now
    pub fn load_above_shed_ratio(&self) -> bool {
        let capacity = self.limits.read().effective_capacity();
        self.above_shed_ratio(self.current_load.load(Ordering::Acquire), capacity)
    }

    fn signal_load(&self, load: usize) {
        let capacity = self.limits.read().effective_capacity();
        if !self.above_shed_ratio(load, capacity) {
            return;
        }

        let signal = LoadSignal {
            current_load: load,
            max_capacity: capacity,
            at: chrono::Utc::now().timestamp_millis(),
        };
        if self.load_tx.try_send(signal).is_err() {
            debug!(current_load = load, "Load signal dropped, controller busy");
        }
    }

    /// Receiver of load signals; available once
    pub fn take_load_signals(&self) -> Option<mpsc::Receiver<LoadSignal>> {
        self.load_rx.lock().take()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskCompletion> {
        self.completion_tx.subscribe()
    }

    pub fn depths(&self) -> QueueDepths {
        let [high, medium, low] =
            std::array::from_fn(|i| self.queues[i].lock().len());
        QueueDepths {
            high,
            medium,
            low,
            in_flight: self.in_flight.load(Ordering::Acquire),
            current_load: self.current_load.load(Ordering::Acquire),
            max_capacity: self.limits.read().effective_capacity(),
        }
    }

    /// Queued plus running tasks
    pub fn current_load(&self) -> usize {
        self.current_load.load(Ordering::Acquire)
    }

    pub fn limits(&self) -> AdmissionLimits {
        self.limits.read().limits
    }

    /// Load ratio above which load signals are sent
    pub fn load_shed_ratio(&self) -> f64 {
        self.load_shed_ratio
    }

    /// Configured capacity without any boost
    pub fn base_capacity(&self) -> usize {
        self.limits.read().limits.max_capacity
    }

    pub fn set_limits(&self, limits: AdmissionLimits) {
        self.limits.write().limits = limits;
        info!(
            cpu_limit = limits.cpu_limit,
            memory_limit = limits.memory_limit,
            max_capacity = limits.max_capacity,
            "Admission limits updated"
        );
        self.notify.notify_one();
    }

    /// Multiply the capacity by `factor` until cleared
    pub fn apply_capacity_boost(&self, factor: f64) {
        let mut state = self.limits.write();
        state.boost = factor.max(1.0);
        debug!(
            boost = state.boost,
            effective_capacity = state.effective_capacity(),
            "Capacity boost applied"
        );
        drop(state);
        self.notify.notify_one();
    }

    pub fn clear_capacity_boost(&self) {
        self.limits.write().boost = 1.0;
    }

    pub fn capacity_boost(&self) -> f64 {
        self.limits.read().boost
    }

    /// Raise or clear one reason for lightweight-first dispatch
    pub fn set_lightweight_first(&self, reason: LightweightReason, enabled: bool) {
        let previous = if enabled {
            self.lightweight_reasons.fetch_or(reason.bit(), Ordering::AcqRel)
        } else {
            self.lightweight_reasons.fetch_and(!reason.bit(), Ordering::AcqRel)
        };
        let enabled_now = self.lightweight_reasons.load(Ordering::Acquire) != 0;
        if (previous != 0) != enabled_now {
            info!(enabled = enabled_now, reason = ?reason, "Lightweight-first dispatch changed");
        }
    }

    pub fn lightweight_first_for(&self, reason: LightweightReason) -> bool {
        self.lightweight_reasons.load(Ordering::Acquire) & reason.bit() != 0
    }

    pub fn lightweight_first(&self) -> bool {
        self.lightweight_reasons.load(Ordering::Acquire) != 0
    }

    /// Run the dispatch loop until shutdown
    ///
    /// Wakes on every enqueue and completion, and on a fixed interval so
    /// admission is re-checked as host metrics change.
    pub async fn run(self: Arc<Self>, dispatch_interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = dispatch_interval.as_millis() as u64,
            "Starting task dispatch loop"
        );

        let mut ticker = interval(dispatch_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.dispatch_ready();
                }
                _ = self.notify.notified() => {
                    self.dispatch_ready();
                }
                _ = shutdown.recv() => {
                    info!(
                        queued = self.depths().queued(),
                        "Shutting down task dispatch loop"
                    );
                    break;
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::StaticProbe;
    use crate::models::TaskKind;
    use tokio::sync::Semaphore;

    fn scheduler_with(max_capacity: usize, probe: Arc<StaticProbe>) -> (Arc<Scheduler>, Arc<MetricsCollector>) {
        let workload = Arc::new(WorkloadTracker::new());
        let collector = Arc::new(MetricsCollector::new(probe, workload.clone(), 60));
        let limits = AdmissionLimits {
            cpu_limit: 85.0,
            memory_limit: 90.0,
            max_capacity,
        };
        let scheduler = Arc::new(Scheduler::new(
            limits,
            0.8,
            collector.clone(),
            workload,
            OptimizerMetrics::new(),
        ));
        (scheduler, collector)
    }

    fn scheduler(max_capacity: usize) -> Arc<Scheduler> {
        scheduler_with(max_capacity, Arc::new(StaticProbe::new(10.0, 10.0))).0
    }

    async fn collect(rx: &mut broadcast::Receiver<TaskCompletion>, n: usize) -> Vec<TaskCompletion> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(rx.recv().await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_dispatch_strictly_by_priority() {
        let scheduler = scheduler(1);
        let mut rx = scheduler.subscribe();

        scheduler.enqueue(TaskSpec::new(async { Ok(()) }).priority(TaskPriority::Low));
        scheduler.enqueue(TaskSpec::new(async { Ok(()) }).priority(TaskPriority::Medium));
        scheduler.enqueue(TaskSpec::new(async { Ok(()) }).priority(TaskPriority::High));
        scheduler.enqueue(TaskSpec::new(async { Ok(()) }).priority(TaskPriority::Low));

        let (_tx, shutdown) = broadcast::channel(1);
        tokio::spawn(scheduler.clone().run(Duration::from_millis(10), shutdown));

        let order: Vec<_> = collect(&mut rx, 4).await.iter().map(|c| c.priority).collect();
        assert_eq!(
            order,
            vec![
                TaskPriority::High,
                TaskPriority::Medium,
                TaskPriority::Low,
                TaskPriority::Low
            ]
        );
    }

    #[tokio::test]
    async fn test_admission_gated_by_capacity() {
        let scheduler = scheduler(10);
        let mut rx = scheduler.subscribe();
        let gate = Arc::new(Semaphore::new(0));

        for _ in 0..11 {
            let gate = gate.clone();
            scheduler.enqueue(TaskSpec::new(async move {
                let _permit = gate.acquire().await?;
                Ok(())
            }));
        }

        assert_eq!(scheduler.dispatch_ready(), 10);
        let depths = scheduler.depths();
        assert_eq!(depths.in_flight, 10);
        assert_eq!(depths.medium, 1);
        assert_eq!(depths.current_load, 11);
        assert!(!scheduler.can_admit());

        gate.add_permits(11);
        rx.recv().await.unwrap();
        assert_eq!(scheduler.dispatch_ready(), 1);

        collect(&mut rx, 10).await;
        assert_eq!(scheduler.depths().current_load, 0);
    }

    #[tokio::test]
    async fn test_admission_gated_by_host_pressure() {
        let probe = Arc::new(StaticProbe::new(95.0, 10.0));
        let (scheduler, collector) = scheduler_with(10, probe.clone());
        collector.sample().await;

        scheduler.enqueue(TaskSpec::new(async { Ok(()) }));
        assert!(!scheduler.can_admit());
        assert_eq!(scheduler.dispatch_ready(), 0);

        probe.set_cpu(50.0);
        probe.set_memory(95.0);
        collector.sample().await;
        assert_eq!(scheduler.dispatch_ready(), 0);

        probe.set_memory(40.0);
        collector.sample().await;
        assert_eq!(scheduler.dispatch_ready(), 1);
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_isolated() {
        let scheduler = scheduler(10);
        let mut rx = scheduler.subscribe();

        let failing = scheduler.enqueue(TaskSpec::new(async { Err(anyhow::anyhow!("boom")) }));
        let panicking = scheduler.enqueue(TaskSpec::new(async {
            if true {
                panic!("kaboom");
            }
            Ok(())
        }));
        let ok = scheduler.enqueue(TaskSpec::new(async { Ok(()) }));

        assert_eq!(scheduler.dispatch_ready(), 3);
        let completions = collect(&mut rx, 3).await;
        let by_id = |id| completions.iter().find(|c| c.task_id == id).unwrap();

        assert!(!by_id(failing).success);
        assert!(by_id(failing).error.as_deref().unwrap().contains("boom"));
        assert!(!by_id(panicking).success);
        assert!(by_id(panicking).error.as_deref().unwrap().contains("kaboom"));
        assert!(by_id(ok).success);

        assert_eq!(scheduler.depths().in_flight, 0);
        assert_eq!(scheduler.workload.total_failed(), 2);
    }

    #[tokio::test]
    async fn test_lightweight_first_within_queue() {
        let scheduler = scheduler(10);
        scheduler.enqueue(TaskSpec::new(async { Ok(()) }).cost(TaskCost::Heavy).named("heavy"));
        scheduler.enqueue(TaskSpec::new(async { Ok(()) }).cost(TaskCost::Light).named("light-1"));
        scheduler.enqueue(TaskSpec::new(async { Ok(()) }).cost(TaskCost::Light).named("light-2"));
        scheduler.enqueue(
            TaskSpec::new(async { Ok(()) })
                .kind(TaskKind::Interactive)
                .cost(TaskCost::Heavy)
                .named("urgent"),
        );

        scheduler.set_lightweight_first(LightweightReason::CpuPressure, true);
        let names: Vec<_> = std::iter::from_fn(|| scheduler.pop_next())
            .map(|t| t.name.unwrap())
            .collect();

        // Priority still wins over cost
        assert_eq!(names, vec!["urgent", "light-1", "light-2", "heavy"]);
    }

    #[tokio::test]
    async fn test_load_signal_above_shed_ratio() {
        let scheduler = scheduler(10);
        let mut signals = scheduler.take_load_signals().unwrap();
        assert!(scheduler.take_load_signals().is_none());

        for _ in 0..8 {
            scheduler.enqueue(TaskSpec::new(async { Ok(()) }));
        }
        assert!(signals.try_recv().is_err());

        scheduler.enqueue(TaskSpec::new(async { Ok(()) }));
        let signal = signals.try_recv().unwrap();
        assert_eq!(signal.current_load, 9);
        assert_eq!(signal.max_capacity, 10);
        assert!(signal.ratio() > 0.8);
    }

    #[tokio::test]
    async fn test_lightweight_reasons_are_independent() {
        let scheduler = scheduler(10);
        assert!(!scheduler.lightweight_first());

        scheduler.set_lightweight_first(LightweightReason::CpuPressure, true);
        scheduler.set_lightweight_first(LightweightReason::LoadShedding, true);
        scheduler.set_lightweight_first(LightweightReason::CpuPressure, false);
        assert!(scheduler.lightweight_first());
        assert!(scheduler.lightweight_first_for(LightweightReason::LoadShedding));
        assert!(!scheduler.lightweight_first_for(LightweightReason::CpuPressure));

        scheduler.set_lightweight_first(LightweightReason::LoadShedding, false);
        assert!(!scheduler.lightweight_first());
    }

    #[tokio::test]
    async fn test_load_above_shed_ratio_tracks_current_load() {
        let scheduler = scheduler(10);
        let gate = Arc::new(Semaphore::new(0));
        for _ in 0..9 {
            let gate = gate.clone();
            scheduler.enqueue(TaskSpec::new(async move {
                let _permit = gate.acquire().await?;
                Ok(())
            }));
        }
        assert!(scheduler.load_above_shed_ratio());

        let mut rx = scheduler.subscribe();
        assert_eq!(scheduler.dispatch_ready(), 9);
        gate.add_permits(9);
        collect(&mut rx, 9).await;
        assert!(!scheduler.load_above_shed_ratio());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_current_load_never_underflows_under_concurrent_dispatch() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 250;
        const TOTAL: usize = PRODUCERS * PER_PRODUCER;

        let scheduler = scheduler(TOTAL);
        let mut rx = scheduler.subscribe();
        let (shutdown_tx, shutdown) = broadcast::channel(1);
        tokio::spawn(scheduler.clone().run(Duration::from_millis(1), shutdown));

        let watcher = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                let mut peak = 0;
                for _ in 0..2_000 {
                    peak = peak.max(scheduler.current_load());
                    tokio::task::yield_now().await;
                }
                peak
            })
        };

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let scheduler = scheduler.clone();
                tokio::spawn(async move {
                    for _ in 0..PER_PRODUCER {
                        scheduler.enqueue(TaskSpec::new(async { Ok(()) }));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }

        collect(&mut rx, TOTAL).await;
        assert!(watcher.await.unwrap() <= TOTAL);
        assert_eq!(scheduler.current_load(), 0);
        shutdown_tx.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_capacity_boost() {
        let scheduler = scheduler(10);
        scheduler.apply_capacity_boost(1.2);
        assert_eq!(scheduler.depths().max_capacity, 12);
        assert_eq!(scheduler.base_capacity(), 10);

        scheduler.clear_capacity_boost();
        assert_eq!(scheduler.depths().max_capacity, 10);
    }
}

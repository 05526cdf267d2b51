//! Periodic metric sampling and trend analysis

use super::{CircularBuffer, SystemProbe, WorkloadTracker};
use crate::models::{MetricKind, MetricSample, Trend, TrendDirection};
use crate::observability::OptimizerMetrics;
use crate::stats::{linear_regression_slope, mean};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

/// Slope magnitude above which a trend is no longer stable
pub const TREND_THRESHOLD: f64 = 0.1;

/// Mean of every metric buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAverages {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub response_time_ms: f64,
    pub throughput_per_sec: f64,
    pub error_rate_percent: f64,
    pub samples: usize,
}

struct CollectorState {
    buffers: [CircularBuffer<f64>; 5],
    latest: Option<MetricSample>,
}

impl CollectorState {
    fn buffer(&self, kind: MetricKind) -> &CircularBuffer<f64> {
        &self.buffers[Self::index(kind)]
    }

    fn index(kind: MetricKind) -> usize {
        match kind {
            MetricKind::Cpu => 0,
            MetricKind::Memory => 1,
            MetricKind::ResponseTime => 2,
            MetricKind::Throughput => 3,
            MetricKind::ErrorRate => 4,
        }
    }
}

/// Samples host and workload metrics into bounded per-metric buffers
pub struct MetricsCollector {
    probe: Arc<dyn SystemProbe>,
    workload: Arc<WorkloadTracker>,
    state: Mutex<CollectorState>,
    sample_tx: broadcast::Sender<MetricSample>,
    probe_failures: AtomicU64,
}

impl MetricsCollector {
    pub fn new(probe: Arc<dyn SystemProbe>, workload: Arc<WorkloadTracker>, window: usize) -> Self {
        let (sample_tx, _) = broadcast::channel(64);
        Self {
            probe,
            workload,
            state: Mutex::new(CollectorState {
                buffers: std::array::from_fn(|_| CircularBuffer::new(window)),
                latest: None,
            }),
            sample_tx,
            probe_failures: AtomicU64::new(0),
        }
    }

    /// Take one sample, append it to the buffers and notify subscribers
    ///
    /// Never fails: an unreadable probe value falls back to the last known
    /// reading (or 0 before the first successful one).
    pub async fn sample(&self) -> MetricSample {
        let previous = self.latest();

        let cpu_percent = match self.probe.cpu_percent().await {
            Ok(v) => v,
            Err(e) => {
                self.probe_failures.fetch_add(1, Ordering::Relaxed);
                warn!(metric = "cpu", error = %e, "Metric source unavailable, using last known value");
                previous.map(|s| s.cpu_percent).unwrap_or(0.0)
            }
        };
        let memory_percent = match self.probe.memory_percent().await {
            Ok(v) => v,
            Err(e) => {
                self.probe_failures.fetch_add(1, Ordering::Relaxed);
                warn!(metric = "memory", error = %e, "Metric source unavailable, using last known value");
                previous.map(|s| s.memory_percent).unwrap_or(0.0)
            }
        };

        let window = self.workload.drain();
        let sample = MetricSample {
            timestamp: chrono::Utc::now().timestamp_millis(),
            cpu_percent,
            memory_percent,
            response_time_ms: window.avg_response_time_ms.unwrap_or(0.0),
            throughput_per_sec: window.throughput_per_sec,
            error_rate_percent: window.error_rate_percent,
        };

        {
            let mut state = self.state.lock();
            for kind in MetricKind::ALL {
                state.buffers[CollectorState::index(kind)].push(sample.value(kind));
            }
            state.latest = Some(sample);
        }

        debug!(
            cpu_percent = sample.cpu_percent,
            memory_percent = sample.memory_percent,
            response_time_ms = sample.response_time_ms,
            throughput_per_sec = sample.throughput_per_sec,
            error_rate_percent = sample.error_rate_percent,
            "Metrics collected"
        );

        // No subscribers is fine
        let _ = self.sample_tx.send(sample);
        sample
    }

    /// Least-squares trend of one metric over its buffer
    pub fn trend(&self, kind: MetricKind) -> Trend {
        let values = self.values(kind);
        if values.is_empty() {
            return Trend::stable();
        }

        let slope = linear_regression_slope(&values);
        let direction = if slope > TREND_THRESHOLD {
            TrendDirection::Increasing
        } else if slope < -TREND_THRESHOLD {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        };

        Trend { slope, direction }
    }

    /// Buffered values of one metric, oldest first
    pub fn values(&self, kind: MetricKind) -> Vec<f64> {
        self.state.lock().buffer(kind).to_vec()
    }

    /// Mean of one metric over its buffer
    pub fn average(&self, kind: MetricKind) -> f64 {
        mean(&self.values(kind))
    }

    pub fn averages(&self) -> PerformanceAverages {
        let state = self.state.lock();
        let avg = |kind| mean(&state.buffer(kind).to_vec());
        PerformanceAverages {
            cpu_percent: avg(MetricKind::Cpu),
            memory_percent: avg(MetricKind::Memory),
            response_time_ms: avg(MetricKind::ResponseTime),
            throughput_per_sec: avg(MetricKind::Throughput),
            error_rate_percent: avg(MetricKind::ErrorRate),
            samples: state.buffer(MetricKind::Cpu).len(),
        }
    }

    pub fn latest(&self) -> Option<MetricSample> {
        self.state.lock().latest
    }

    /// Receive every sample as it is collected
    pub fn subscribe(&self) -> broadcast::Receiver<MetricSample> {
        self.sample_tx.subscribe()
    }

    pub fn probe_failures(&self) -> u64 {
        self.probe_failures.load(Ordering::Relaxed)
    }

    /// Run the sampling loop until shutdown, timing each sample
    pub async fn run(
        self: Arc<Self>,
        sample_interval: Duration,
        metrics: OptimizerMetrics,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            interval_ms = sample_interval.as_millis() as u64,
            "Starting metrics sampling loop"
        );

        let mut ticker = interval(sample_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = Instant::now();
                    self.sample().await;
                    metrics.observe_sample_latency(started.elapsed().as_secs_f64());
                }
                _ = shutdown.recv() => {
                    info!("Shutting down metrics sampling loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::StaticProbe;

    fn collector_with(probe: Arc<StaticProbe>, window: usize) -> MetricsCollector {
        MetricsCollector::new(probe, Arc::new(WorkloadTracker::new()), window)
    }

    #[tokio::test]
    async fn test_sample_fills_buffers() {
        let probe = Arc::new(StaticProbe::new(40.0, 55.0));
        let collector = collector_with(probe, 60);

        let sample = collector.sample().await;
        assert_eq!(sample.cpu_percent, 40.0);
        assert_eq!(sample.memory_percent, 55.0);
        assert_eq!(collector.values(MetricKind::Cpu), vec![40.0]);
        assert_eq!(collector.latest(), Some(sample));
    }

    #[tokio::test]
    async fn test_buffers_bounded_by_window() {
        let probe = Arc::new(StaticProbe::new(10.0, 10.0));
        let collector = collector_with(probe, 5);

        for _ in 0..12 {
            collector.sample().await;
        }
        for kind in MetricKind::ALL {
            assert_eq!(collector.values(kind).len(), 5);
        }
        assert_eq!(collector.averages().samples, 5);
    }

    #[tokio::test]
    async fn test_trend_directions() {
        let probe = Arc::new(StaticProbe::new(10.0, 50.0));
        let collector = collector_with(probe.clone(), 60);

        assert_eq!(collector.trend(MetricKind::Cpu), Trend::stable());

        for i in 0..10 {
            probe.set_cpu(10.0 + i as f64 * 5.0);
            probe.set_memory(50.0 - i as f64);
            collector.sample().await;
        }

        let cpu = collector.trend(MetricKind::Cpu);
        assert_eq!(cpu.direction, TrendDirection::Increasing);
        assert!((cpu.slope - 5.0).abs() < 1e-9);

        let memory = collector.trend(MetricKind::Memory);
        assert_eq!(memory.direction, TrendDirection::Decreasing);

        let errors = collector.trend(MetricKind::ErrorRate);
        assert_eq!(errors.direction, TrendDirection::Stable);
    }

    #[tokio::test]
    async fn test_probe_failure_uses_last_known_value() {
        let probe = Arc::new(StaticProbe::new(42.0, 61.0));
        let collector = collector_with(probe.clone(), 60);
        collector.sample().await;

        probe.set_failing(true);
        probe.set_cpu(99.0);
        let sample = collector.sample().await;

        assert_eq!(sample.cpu_percent, 42.0);
        assert_eq!(sample.memory_percent, 61.0);
        assert_eq!(collector.probe_failures(), 2);
        assert_eq!(collector.values(MetricKind::Cpu).len(), 2);
    }

    struct SlowProbe;

    #[async_trait::async_trait]
    impl SystemProbe for SlowProbe {
        async fn cpu_percent(&self) -> anyhow::Result<f64> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(30.0)
        }

        async fn memory_percent(&self) -> anyhow::Result<f64> {
            Ok(40.0)
        }
    }

    fn sample_latency_totals() -> (u64, f64) {
        prometheus::gather()
            .iter()
            .find(|family| family.get_name() == "optimizer_sample_latency_seconds")
            .map(|family| {
                let histogram = family.get_metric()[0].get_histogram();
                (histogram.get_sample_count(), histogram.get_sample_sum())
            })
            .unwrap_or((0, 0.0))
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_records_sampling_time_not_interval() {
        let metrics = OptimizerMetrics::new();
        let (count_before, sum_before) = sample_latency_totals();

        let collector = Arc::new(MetricsCollector::new(
            Arc::new(SlowProbe),
            Arc::new(WorkloadTracker::new()),
            60,
        ));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(collector.clone().run(Duration::from_secs(1), metrics, shutdown_rx));

        // Ticks at 0s, 1s and 2s
        tokio::time::sleep(Duration::from_millis(2500)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(collector.values(MetricKind::Cpu).len(), 3);
        let (count_after, sum_after) = sample_latency_totals();
        assert!(count_after - count_before >= 3);
        let recorded = sum_after - sum_before;
        assert!(recorded >= 0.15 - 1e-9, "recorded {}", recorded);
        assert!(recorded < 1.0, "recorded {}", recorded);
    }

    #[tokio::test]
    async fn test_workload_metrics_flow_into_sample() {
        let probe = Arc::new(StaticProbe::new(10.0, 10.0));
        let workload = Arc::new(WorkloadTracker::new());
        let collector = MetricsCollector::new(probe, workload.clone(), 60);

        workload.record(300, true);
        workload.record(100, false);
        let sample = collector.sample().await;

        assert_eq!(sample.response_time_ms, 200.0);
        assert_eq!(sample.error_rate_percent, 50.0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_samples() {
        let probe = Arc::new(StaticProbe::new(12.0, 34.0));
        let collector = collector_with(probe, 60);
        let mut rx = collector.subscribe();

        let sample = collector.sample().await;
        assert_eq!(rx.try_recv().unwrap(), sample);
    }
}

//! Metric collection
//!
//! Host CPU and memory come from a [`SystemProbe`]; response time, throughput
//! and error rate come from task completions recorded by the scheduler. The
//! [`MetricsCollector`] merges both into one [`crate::models::MetricSample`]
//! per cycle and keeps a bounded history of each metric.

mod buffer;
mod procfs;
mod sampler;
mod static_probe;
mod workload;

pub use buffer::CircularBuffer;
pub use procfs::{CpuTimes, ProcfsProbe};
pub use sampler::{MetricsCollector, PerformanceAverages, TREND_THRESHOLD};
pub use static_probe::StaticProbe;
pub use workload::{WorkloadTracker, WorkloadWindow};

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

pub use async_trait::async_trait;

/// Source of host-level resource readings
#[async_trait]
pub trait SystemProbe: Send + Sync {
    /// CPU busy percentage (0-100)
    async fn cpu_percent(&self) -> Result<f64>;

    /// Memory in use as a percentage of total (0-100)
    async fn memory_percent(&self) -> Result<f64>;
}

/// Pick the best probe for this host
pub fn create_probe(proc_root: &Path) -> Arc<dyn SystemProbe> {
    if proc_root.join("stat").exists() && proc_root.join("meminfo").exists() {
        tracing::info!(proc_root = %proc_root.display(), "Using procfs system probe");
        Arc::new(ProcfsProbe::with_proc_path(proc_root))
    } else {
        tracing::warn!(
            proc_root = %proc_root.display(),
            "procfs not available, host readings stay at zero; supply a probe through Optimizer::with_probe"
        );
        Arc::new(StaticProbe::default())
    }
}

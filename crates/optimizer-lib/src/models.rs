//! Core data models shared across the optimizer components

use serde::{Deserialize, Serialize};

/// One sampling cycle of system and workload metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub response_time_ms: f64,
    pub throughput_per_sec: f64,
    pub error_rate_percent: f64,
}

impl MetricSample {
    /// Value of a single metric in this sample
    pub fn value(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Cpu => self.cpu_percent,
            MetricKind::Memory => self.memory_percent,
            MetricKind::ResponseTime => self.response_time_ms,
            MetricKind::Throughput => self.throughput_per_sec,
            MetricKind::ErrorRate => self.error_rate_percent,
        }
    }
}

/// Metrics tracked by the collector, one circular buffer each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Cpu,
    Memory,
    ResponseTime,
    Throughput,
    ErrorRate,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Cpu,
        MetricKind::Memory,
        MetricKind::ResponseTime,
        MetricKind::Throughput,
        MetricKind::ErrorRate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
            MetricKind::ResponseTime => "response_time",
            MetricKind::Throughput => "throughput",
            MetricKind::ErrorRate => "error_rate",
        }
    }
}

/// Direction of a metric trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// Least-squares trend over a metric buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub slope: f64,
    pub direction: TrendDirection,
}

impl Trend {
    pub fn stable() -> Self {
        Self {
            slope: 0.0,
            direction: TrendDirection::Stable,
        }
    }
}

/// Placement hint for the tiered cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePriority {
    Low,
    Medium,
    High,
}

/// Dispatch class for the scheduler
///
/// Deliberately separate from [`CachePriority`]: this one orders execution,
/// the cache one only decides placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl TaskPriority {
    /// Dispatch order, highest first
    pub const DISPATCH_ORDER: [TaskPriority; 3] =
        [TaskPriority::High, TaskPriority::Medium, TaskPriority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
        }
    }

    pub(crate) fn queue_index(&self) -> usize {
        match self {
            TaskPriority::High => 0,
            TaskPriority::Medium => 1,
            TaskPriority::Low => 2,
        }
    }
}

/// Declared kind of work, used to classify tasks without an explicit priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Latency-critical work such as health checks or user-facing requests
    Interactive,
    /// Anything without a more specific declaration
    #[default]
    Standard,
    /// Bulk processing that can tolerate queueing
    Batch,
    /// Housekeeping: cleanup, analytics, prefetch
    Background,
}

impl TaskKind {
    pub fn default_priority(&self) -> TaskPriority {
        match self {
            TaskKind::Interactive => TaskPriority::High,
            TaskKind::Standard => TaskPriority::Medium,
            TaskKind::Batch | TaskKind::Background => TaskPriority::Low,
        }
    }
}

/// Relative execution weight of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCost {
    Light,
    #[default]
    Normal,
    Heavy,
}

/// Completion event emitted for every dispatched task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub task_id: u64,
    pub priority: TaskPriority,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One load observation stored in a time-of-week bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadObservation {
    /// Unix timestamp in seconds
    pub timestamp: i64,
    pub observed_load: f64,
    pub cpu: f64,
    pub memory: f64,
}

/// Short-horizon load forecast for one hour bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub horizon_label: String,
    pub expected_load: f64,
    pub confidence: f64,
    /// Unix timestamp in seconds
    pub produced_at: i64,
    pub sample_count: usize,
}

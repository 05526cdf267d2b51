//! Workload-side metrics derived from task completions
//!
//! The scheduler records every completion here; the collector drains one
//! window per sample to obtain response time, throughput and error rate.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

#[derive(Debug)]
struct WindowState {
    started_at: Instant,
    completed: u64,
    failed: u64,
    total_duration_ms: u64,
}

impl WindowState {
    fn new(started_at: Instant) -> Self {
        Self {
            started_at,
            completed: 0,
            failed: 0,
            total_duration_ms: 0,
        }
    }
}

/// Aggregates of one sampling window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkloadWindow {
    /// Mean duration of tasks completed in the window, `None` if there were none
    pub avg_response_time_ms: Option<f64>,
    pub throughput_per_sec: f64,
    pub error_rate_percent: f64,
    pub completed: u64,
}

/// Thread-safe accumulator of task completions
#[derive(Debug)]
pub struct WorkloadTracker {
    window: Mutex<WindowState>,
    total_completed: AtomicU64,
    total_failed: AtomicU64,
}

impl WorkloadTracker {
    pub fn new() -> Self {
        Self {
            window: Mutex::new(WindowState::new(Instant::now())),
            total_completed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
        }
    }

    /// Record one finished task
    pub fn record(&self, duration_ms: u64, success: bool) {
        {
            let mut window = self.window.lock();
            window.completed += 1;
            window.total_duration_ms += duration_ms;
            if !success {
                window.failed += 1;
            }
        }
        self.total_completed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.total_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Close the current window and start a new one
    pub fn drain(&self) -> WorkloadWindow {
        let now = Instant::now();
        let state = std::mem::replace(&mut *self.window.lock(), WindowState::new(now));

        let elapsed_secs = now.duration_since(state.started_at).as_secs_f64();
        let throughput_per_sec = if elapsed_secs > 0.0 {
            state.completed as f64 / elapsed_secs
        } else {
            0.0
        };

        if state.completed == 0 {
            return WorkloadWindow {
                avg_response_time_ms: None,
                throughput_per_sec,
                error_rate_percent: 0.0,
                completed: 0,
            };
        }

        WorkloadWindow {
            avg_response_time_ms: Some(state.total_duration_ms as f64 / state.completed as f64),
            throughput_per_sec,
            error_rate_percent: state.failed as f64 / state.completed as f64 * 100.0,
            completed: state.completed,
        }
    }

    pub fn total_completed(&self) -> u64 {
        self.total_completed.load(Ordering::Relaxed)
    }

    pub fn total_failed(&self) -> u64 {
        self.total_failed.load(Ordering::Relaxed)
    }
}

impl Default for WorkloadTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_window_aggregates() {
        let tracker = WorkloadTracker::new();
        tracker.record(100, true);
        tracker.record(300, true);
        tracker.record(200, false);
        tracker.record(400, true);

        tokio::time::advance(Duration::from_secs(2)).await;
        let window = tracker.drain();

        assert_eq!(window.completed, 4);
        assert_eq!(window.avg_response_time_ms, Some(250.0));
        assert!((window.throughput_per_sec - 2.0).abs() < 1e-9);
        assert!((window.error_rate_percent - 25.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_resets_window() {
        let tracker = WorkloadTracker::new();
        tracker.record(50, false);
        tokio::time::advance(Duration::from_secs(1)).await;
        tracker.drain();

        tokio::time::advance(Duration::from_secs(1)).await;
        let window = tracker.drain();
        assert_eq!(window.completed, 0);
        assert_eq!(window.avg_response_time_ms, None);
        assert_eq!(window.error_rate_percent, 0.0);

        assert_eq!(tracker.total_completed(), 1);
        assert_eq!(tracker.total_failed(), 1);
    }
}

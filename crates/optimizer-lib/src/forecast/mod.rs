//! Load forecasting from time-of-week patterns
//!
//! Observations are bucketed by (weekday, hour). A refresh predicts the load
//! of each upcoming hour bucket as the mean of its history, with a confidence
//! that falls as the bucket's variance grows. Forecasts are advisory: the
//! controller uses them to scale ahead of predicted peaks.

mod pattern;

pub use pattern::{LoadPattern, PatternKey, MIN_CONFIDENCE};

use crate::collector::MetricsCollector;
use crate::models::{Forecast, LoadObservation};
use crate::scheduler::Scheduler;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info};

/// Aggregate view of the forecaster for reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    pub buckets_tracked: usize,
    pub observations: usize,
    pub forecasts: Vec<Forecast>,
    pub peak_expected_load: f64,
    pub mean_confidence: f64,
}

/// Label of the forecast `hours` ahead
pub fn horizon_label(hours: u32) -> String {
    format!("{}h", hours)
}

/// Time-of-week load forecaster
pub struct LoadForecaster {
    horizons: Vec<u32>,
    history: usize,
    patterns: RwLock<HashMap<PatternKey, LoadPattern>>,
    /// Keyed by horizon hours so iteration follows the horizon order
    forecasts: RwLock<BTreeMap<u32, Forecast>>,
    refreshes: AtomicU64,
    refresh_tx: broadcast::Sender<ForecastSummary>,
}

impl LoadForecaster {
    pub fn new(horizons: Vec<u32>, history: usize) -> Self {
        let (refresh_tx, _) = broadcast::channel(8);
        Self {
            horizons,
            history,
            patterns: RwLock::new(HashMap::new()),
            forecasts: RwLock::new(BTreeMap::new()),
            refreshes: AtomicU64::new(0),
            refresh_tx,
        }
    }

    /// Store an observation in the bucket of `at`
    pub fn record_at(&self, at: DateTime<Utc>, observation: LoadObservation) {
        let key = PatternKey::at(at);
        self.patterns
            .write()
            .entry(key)
            .or_insert_with(|| LoadPattern::new(self.history))
            .record(observation);
        debug!(
            weekday = key.weekday,
            hour = key.hour,
            load = observation.observed_load,
            "Load observation recorded"
        );
    }

    /// Record the current load of `scheduler` with the latest host readings
    pub fn capture(&self, scheduler: &Scheduler, collector: &MetricsCollector) {
        let now = Utc::now();
        let (cpu, memory) = collector
            .latest()
            .map(|s| (s.cpu_percent, s.memory_percent))
            .unwrap_or((0.0, 0.0));

        self.record_at(
            now,
            LoadObservation {
                timestamp: now.timestamp(),
                observed_load: scheduler.current_load() as f64,
                cpu,
                memory,
            },
        );
    }

    /// Recompute every horizon relative to `now`
    ///
    /// Horizons whose bucket has no history are dropped.
    pub fn refresh(&self, now: DateTime<Utc>) -> ForecastSummary {
        let produced = {
            let patterns = self.patterns.read();
            self.horizons
                .iter()
                .filter_map(|&hours| {
                    let target = now + ChronoDuration::hours(hours as i64);
                    let pattern = patterns.get(&PatternKey::at(target))?;
                    if pattern.is_empty() {
                        return None;
                    }
                    Some((
                        hours,
                        Forecast {
                            horizon_label: horizon_label(hours),
                            expected_load: pattern.expected_load(),
                            confidence: pattern.confidence(),
                            produced_at: now.timestamp(),
                            sample_count: pattern.len(),
                        },
                    ))
                })
                .collect::<BTreeMap<_, _>>()
        };

        *self.forecasts.write() = produced;
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        let summary = self.summary();

        info!(
            forecasts = summary.forecasts.len(),
            peak_expected_load = summary.peak_expected_load,
            mean_confidence = summary.mean_confidence,
            "Load forecasts refreshed"
        );
        // No subscribers is fine
        let _ = self.refresh_tx.send(summary.clone());
        summary
    }

    /// Completed refreshes since construction
    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Forecast for a label such as `"3h"`
    pub fn get(&self, label: &str) -> Option<Forecast> {
        self.forecasts
            .read()
            .values()
            .find(|f| f.horizon_label == label)
            .cloned()
    }

    pub fn forecasts(&self) -> Vec<Forecast> {
        self.forecasts.read().values().cloned().collect()
    }

    pub fn summary(&self) -> ForecastSummary {
        let (buckets_tracked, observations) = {
            let patterns = self.patterns.read();
            (patterns.len(), patterns.values().map(|p| p.len()).sum())
        };
        let forecasts = self.forecasts();

        let peak_expected_load = forecasts
            .iter()
            .map(|f| f.expected_load)
            .fold(0.0_f64, f64::max);
        let mean_confidence = if forecasts.is_empty() {
            0.0
        } else {
            forecasts.iter().map(|f| f.confidence).sum::<f64>() / forecasts.len() as f64
        };

        ForecastSummary {
            buckets_tracked,
            observations,
            forecasts,
            peak_expected_load,
            mean_confidence,
        }
    }

    /// Receive a summary after every refresh
    pub fn subscribe(&self) -> broadcast::Receiver<ForecastSummary> {
        self.refresh_tx.subscribe()
    }

    /// Run the observation capture loop until shutdown
    pub async fn run_capture(
        self: Arc<Self>,
        scheduler: Arc<Scheduler>,
        collector: Arc<MetricsCollector>,
        capture_interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            interval_ms = capture_interval.as_millis() as u64,
            "Starting load pattern capture loop"
        );

        let mut ticker = interval(capture_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.capture(&scheduler, &collector);
                }
                _ = shutdown.recv() => {
                    info!("Shutting down load pattern capture loop");
                    break;
                }
            }
        }
    }

    /// Run the forecast refresh loop until shutdown
    pub async fn run_refresh(self: Arc<Self>, refresh_interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = refresh_interval.as_millis() as u64,
            horizons = ?self.horizons,
            "Starting forecast refresh loop"
        );

        let mut ticker = interval(refresh_interval);
        // The first tick fires immediately, before any history exists
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh(Utc::now());
                }
                _ = shutdown.recv() => {
                    info!("Shutting down forecast refresh loop");
                    break;
                }
            }
        }
    }
}

//! Time-of-week load patterns

use crate::collector::CircularBuffer;
use crate::models::LoadObservation;
use crate::stats::{mean, population_variance};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Lowest confidence ever reported for a bucket with history
pub const MIN_CONFIDENCE: f64 = 0.5;

/// Bucket key: day of week (0 = Monday) and hour of day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternKey {
    pub weekday: u32,
    pub hour: u32,
}

impl PatternKey {
    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            weekday: time.weekday().num_days_from_monday(),
            hour: time.hour(),
        }
    }
}

/// Bounded history of observations for one bucket
#[derive(Debug, Clone)]
pub struct LoadPattern {
    history: CircularBuffer<LoadObservation>,
}

impl LoadPattern {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: CircularBuffer::new(capacity),
        }
    }

    pub fn record(&mut self, observation: LoadObservation) {
        self.history.push(observation);
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    fn loads(&self) -> Vec<f64> {
        self.history
            .to_vec()
            .into_iter()
            .map(|o| o.observed_load)
            .collect()
    }

    pub fn expected_load(&self) -> f64 {
        mean(&self.loads())
    }

    /// `max(0.5, 1 - variance / (mean + 1))`, never above 1
    pub fn confidence(&self) -> f64 {
        let loads = self.loads();
        if loads.is_empty() {
            return MIN_CONFIDENCE;
        }
        let m = mean(&loads);
        let variance = population_variance(&loads);
        (1.0 - variance / (m + 1.0)).clamp(MIN_CONFIDENCE, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn observation(load: f64) -> LoadObservation {
        LoadObservation {
            timestamp: 0,
            observed_load: load,
            cpu: 0.0,
            memory: 0.0,
        }
    }

    #[test]
    fn test_key_from_time() {
        // 2024-01-01 was a Monday
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 14, 30, 0).unwrap();
        assert_eq!(PatternKey::at(time), PatternKey { weekday: 0, hour: 14 });
    }

    #[test]
    fn test_uniform_history_has_full_confidence() {
        let mut pattern = LoadPattern::new(50);
        for _ in 0..3 {
            pattern.record(observation(10.0));
        }
        assert_eq!(pattern.expected_load(), 10.0);
        assert_eq!(pattern.confidence(), 1.0);
    }

    #[test]
    fn test_noisy_history_floors_at_half() {
        let mut pattern = LoadPattern::new(50);
        for load in [0.0, 100.0, 0.0, 100.0] {
            pattern.record(observation(load));
        }
        assert_eq!(pattern.confidence(), MIN_CONFIDENCE);
    }

    #[test]
    fn test_moderate_variance() {
        let mut pattern = LoadPattern::new(50);
        for load in [8.0, 10.0, 12.0] {
            pattern.record(observation(load));
        }
        // variance 8/3, mean 10
        let expected = 1.0 - (8.0 / 3.0) / 11.0;
        assert!((pattern.confidence() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_history_bounded() {
        let mut pattern = LoadPattern::new(3);
        for i in 0..10 {
            pattern.record(observation(i as f64));
        }
        assert_eq!(pattern.len(), 3);
        assert_eq!(pattern.expected_load(), 8.0);
    }
}

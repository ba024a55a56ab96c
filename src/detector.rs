//! Sliding-window z-score detector.
//!
//! One writer (the processing loop) calls [`Detector::analyze`]; any number of
//! readers take snapshots concurrently. All state sits behind a single
//! `RwLock` so readers never observe a half-updated counter set.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::algo::RollingWindow;
use crate::anomaly_buffer::AnomalyBuffer;
use crate::config::{DetectorConfig, MIN_WINDOW_FOR_ANOMALY};
use crate::error::ConfigError;
use crate::model::{AnalysisResult, AnalyticsStats, Sample};

#[derive(Debug, Default, Clone)]
struct Counters {
    current_value: f64,
    rolling_average: f64,
    anomaly_rate: f64,
    total_metrics: u64,
    total_anomalies: u64,
    last_anomaly_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct DetectorState {
    window: RollingWindow,
    anomalies: AnomalyBuffer<AnalysisResult>,
    counters: Counters,
}

pub struct Detector {
    config: DetectorConfig,
    state: RwLock<DetectorState>,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let state = DetectorState {
            window: RollingWindow::new(config.window_capacity),
            anomalies: AnomalyBuffer::default(),
            counters: Counters::default(),
        };

        Ok(Self {
            config,
            state: RwLock::new(state),
        })
    }

    /// Score `sample` against the window and fold it into the aggregates.
    pub fn analyze(&self, sample: Sample) -> AnalysisResult {
        let value = sample.reading(self.config.observed_field);

        let mut state = self.write();
        let stats = state.window.update(value);
        let is_anomaly = stats.z_score.abs() > self.config.z_score_threshold
            && state.window.len() >= MIN_WINDOW_FOR_ANOMALY;

        let now = Utc::now();
        let result = AnalysisResult {
            timestamp: now,
            sample,
            rolling_average: stats.mean,
            z_score: stats.z_score,
            is_anomaly,
        };

        let counters = &mut state.counters;
        counters.current_value = value;
        counters.rolling_average = stats.mean;
        counters.total_metrics += 1;
        if is_anomaly {
            counters.total_anomalies += 1;
            counters.last_anomaly_time = Some(now);
        }
        counters.anomaly_rate = counters.total_anomalies as f64 / counters.total_metrics as f64;

        if is_anomaly {
            state.anomalies.push(result.clone());
        }

        result
    }

    pub fn current_stats(&self) -> AnalyticsStats {
        let counters = self.read().counters.clone();

        AnalyticsStats {
            current_value: counters.current_value,
            rolling_average: counters.rolling_average,
            anomaly_rate: counters.anomaly_rate,
            total_metrics: counters.total_metrics,
            total_anomalies: counters.total_anomalies,
            last_anomaly_time: counters.last_anomaly_time,
            window_size: self.config.window_capacity,
            z_score_threshold: self.config.z_score_threshold,
            observed_field: self.config.observed_field,
        }
    }

    /// Up to `limit` most recent anomalies, oldest first.
    pub fn recent_anomalies(&self, limit: usize) -> Vec<AnalysisResult> {
        self.read().anomalies.recent(limit)
    }

    /// Window contents in arrival order.
    pub fn window_values(&self) -> Vec<f64> {
        self.read().window.iter().collect()
    }

    // A panic mid-update can only come from an allocation failure; the state
    // is still structurally valid, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, DetectorState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, DetectorState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

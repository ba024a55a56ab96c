//! Wire and domain types shared by the pipeline stages.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// One periodic performance observation from a device.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    /// Requests per second
    pub rps: f64,
    pub latency_ms: f64,
}

impl Sample {
    /// Sample stamped with the current time carrying only an `rps` reading.
    pub fn new(device_id: impl Into<String>, rps: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            device_id: device_id.into(),
            cpu_usage: 0.0,
            memory_usage: 0.0,
            rps,
            latency_ms: 0.0,
        }
    }

    pub fn reading(&self, field: ObservedField) -> f64 {
        match field {
            ObservedField::Rps => self.rps,
            ObservedField::CpuUsage => self.cpu_usage,
            ObservedField::MemoryUsage => self.memory_usage,
            ObservedField::LatencyMs => self.latency_ms,
        }
    }

    /// Cache key: `metric:{device_id}:{unix nanos}`.
    pub fn cache_key(&self) -> String {
        let nanos = self
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.timestamp.timestamp_micros().saturating_mul(1_000));
        format!("metric:{}:{}", self.device_id, nanos)
    }
}

/// The single reading the detector tracks.
#[derive(Serialize, Deserialize, ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ObservedField {
    #[default]
    Rps,
    CpuUsage,
    MemoryUsage,
    LatencyMs,
}

/// Outcome of analysing one sample.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub timestamp: DateTime<Utc>,
    pub sample: Sample,
    pub rolling_average: f64,
    pub z_score: f64,
    pub is_anomaly: bool,
}

/// Point-in-time copy of the detector's aggregate counters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AnalyticsStats {
    pub current_value: f64,
    pub rolling_average: f64,
    pub anomaly_rate: f64,
    pub total_metrics: u64,
    pub total_anomalies: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_anomaly_time: Option<DateTime<Utc>>,
    pub window_size: usize,
    pub z_score_threshold: f64,
    pub observed_field: ObservedField,
}

//! Service and detector configuration.
//!
//! Every flag can also be supplied through the environment, so the service
//! runs unchanged under a container orchestrator.

use clap::Parser;

use crate::error::ConfigError;
use crate::model::ObservedField;

pub const DEFAULT_WINDOW_CAPACITY: usize = 50;
pub const DEFAULT_Z_SCORE_THRESHOLD: f64 = 2.0;
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Minimum window length before any sample may be flagged.
pub const MIN_WINDOW_FOR_ANOMALY: usize = 10;

/// Upper bounds for preallocated buffers.
pub const MAX_WINDOW_CAPACITY: usize = 1_000_000;
pub const MAX_QUEUE_CAPACITY: usize = 10_000_000;

/// Reject zero and anything above `max`.
pub fn check_capacity(name: &'static str, requested: usize, max: usize) -> Result<(), ConfigError> {
    if requested == 0 {
        return Err(ConfigError::ZeroCapacity { name });
    }
    if requested > max {
        return Err(ConfigError::CapacityTooLarge {
            name,
            requested,
            max,
        });
    }
    Ok(())
}

/// Static detector parameters, fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub window_capacity: usize,
    pub z_score_threshold: f64,
    pub observed_field: ObservedField,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            z_score_threshold: DEFAULT_Z_SCORE_THRESHOLD,
            observed_field: ObservedField::Rps,
        }
    }
}

impl DetectorConfig {
    pub fn new(window_capacity: usize, z_score_threshold: f64) -> Self {
        Self {
            window_capacity,
            z_score_threshold,
            ..Self::default()
        }
    }

    pub fn with_observed_field(mut self, field: ObservedField) -> Self {
        self.observed_field = field;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_capacity == 0 {
            return Err(ConfigError::ZeroWindowCapacity);
        }
        check_capacity("window", self.window_capacity, MAX_WINDOW_CAPACITY)?;
        if !self.z_score_threshold.is_finite() || self.z_score_threshold <= 0.0 {
            return Err(ConfigError::InvalidThreshold(self.z_score_threshold));
        }
        Ok(())
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "pulsewatch")]
#[command(about = "Streaming sliding-window anomaly detection for device performance samples")]
pub struct ServiceConfig {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Redis URL for the sample cache; the in-memory store is used when absent
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Ingestion queue capacity
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Sliding window capacity
    #[arg(long, env = "WINDOW_CAPACITY", default_value_t = DEFAULT_WINDOW_CAPACITY)]
    pub window_capacity: usize,

    /// Absolute z-score above which a sample is anomalous
    #[arg(long, env = "Z_SCORE_THRESHOLD", default_value_t = DEFAULT_Z_SCORE_THRESHOLD)]
    pub z_score_threshold: f64,

    /// Sample reading the detector tracks
    #[arg(long, env = "OBSERVED_FIELD", value_enum, default_value = "rps")]
    pub observed_field: ObservedField,

    /// TTL of cached samples in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "3600")]
    pub cache_ttl_secs: u64,

    /// Length of the recent-samples index kept by the cache
    #[arg(long, env = "CACHE_RECENT_LIMIT", default_value = "1000")]
    pub cache_recent_limit: usize,

    /// Capacity of the channel feeding the cache writer
    #[arg(long, env = "CACHE_QUEUE_CAPACITY", default_value = "10000")]
    pub cache_queue_capacity: usize,
}

impl ServiceConfig {
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig::new(self.window_capacity, self.z_score_threshold)
            .with_observed_field(self.observed_field)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check everything that would otherwise fail later at construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detector_config().validate()?;
        check_capacity("queue", self.queue_capacity, MAX_QUEUE_CAPACITY)?;
        check_capacity("cache queue", self.cache_queue_capacity, MAX_QUEUE_CAPACITY)?;
        check_capacity("cache recent list", self.cache_recent_limit, MAX_QUEUE_CAPACITY)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_detector_config_is_valid() {
        let config = DetectorConfig::default();
        assert_eq!(config.window_capacity, 50);
        assert_eq!(config.z_score_threshold, 2.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_degenerate_detector_config() {
        assert_eq!(
            DetectorConfig::new(0, 2.0).validate(),
            Err(ConfigError::ZeroWindowCapacity)
        );
        assert_eq!(
            DetectorConfig::new(50, 0.0).validate(),
            Err(ConfigError::InvalidThreshold(0.0))
        );
        assert_eq!(
            DetectorConfig::new(50, -1.5).validate(),
            Err(ConfigError::InvalidThreshold(-1.5))
        );
        assert!(DetectorConfig::new(50, f64::NAN).validate().is_err());
        assert!(DetectorConfig::new(50, f64::INFINITY).validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_capacities() {
        assert_eq!(
            DetectorConfig::new(usize::MAX, 2.0).validate(),
            Err(ConfigError::CapacityTooLarge {
                name: "window",
                requested: usize::MAX,
                max: MAX_WINDOW_CAPACITY,
            })
        );
        assert!(DetectorConfig::new(MAX_WINDOW_CAPACITY, 2.0).validate().is_ok());

        let config = ServiceConfig::try_parse_from([
            "pulsewatch",
            "--queue-capacity",
            "18446744073709551615",
        ])
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CapacityTooLarge { name: "queue", .. })
        ));

        let config =
            ServiceConfig::try_parse_from(["pulsewatch", "--cache-queue-capacity", "0"]).unwrap();
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroCapacity { name: "cache queue" })
        );
    }

    #[test]
    fn test_service_config_defaults() {
        let config = ServiceConfig::try_parse_from(["pulsewatch"]).unwrap();

        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.detector_config(), DetectorConfig::default());
        assert_eq!(config.cache_recent_limit, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_service_config_flags() {
        let config = ServiceConfig::try_parse_from([
            "pulsewatch",
            "--port",
            "9090",
            "--window-capacity",
            "20",
            "--z-score-threshold",
            "3.5",
            "--observed-field",
            "latency-ms",
            "--queue-capacity",
            "0",
        ])
        .unwrap();

        assert_eq!(config.bind_addr(), "0.0.0.0:9090");
        assert_eq!(config.detector_config().window_capacity, 20);
        assert_eq!(config.observed_field, ObservedField::LatencyMs);
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroCapacity { name: "queue" })
        );
    }
}

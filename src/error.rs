//! Error types for the detection pipeline and its collaborators.

use thiserror::Error;

/// Rejected configuration. Raised at construction time only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("window capacity must be positive")]
    ZeroWindowCapacity,

    #[error("z-score threshold must be a positive finite number, got {0}")]
    InvalidThreshold(f64),

    #[error("{name} capacity must be positive")]
    ZeroCapacity { name: &'static str },

    #[error("{name} capacity {requested} exceeds the maximum of {max}")]
    CapacityTooLarge {
        name: &'static str,
        requested: usize,
        max: usize,
    },
}

/// Failure while writing a sample to the cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to serialize sample: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

/// Fatal errors surfaced by the service binary.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cache store: {0}")]
    Cache(#[from] CacheError),

    #[error("metrics registry: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),
}

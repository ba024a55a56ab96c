//! Streaming sliding-window anomaly detection for device performance samples.
//!
//! Samples enter through a bounded [`queue`], are drained in order by the
//! single [`pipeline::ProcessingLoop`] and scored by the [`detector::Detector`].
//! The HTTP adapter in [`server`] exposes ingestion and the detector's
//! read-only views; [`cache`] and [`metrics`] are best-effort side outputs.

pub mod algo;
pub mod anomaly_buffer;
pub mod cache;
pub mod config;
pub mod detector;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod queue;
pub mod server;

pub use config::{DetectorConfig, ServiceConfig};
pub use detector::Detector;
pub use error::{CacheError, ConfigError, ServiceError};
pub use model::{AnalysisResult, AnalyticsStats, ObservedField, Sample};
pub use queue::{Admission, QueueConsumer, QueueProducer, ingest_queue};

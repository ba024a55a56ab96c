//! pulsewatch: ingestion server for streaming anomaly detection.
//!
//! Endpoints:
//! - POST /metrics/ingest        single sample
//! - POST /metrics/ingest/batch  array of samples
//! - GET  /analytics/current     aggregate stats
//! - GET  /analytics/anomalies   recent anomalies (`?limit=N`)
//! - GET  /metrics/prometheus    Prometheus scrape
//! - GET  /health                liveness

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pulsewatch::{
    ServiceConfig, ServiceError,
    cache::{CacheForwarder, MemoryStore, RedisStore, SampleStore},
    detector::Detector,
    metrics::PrometheusExporter,
    pipeline::ProcessingLoop,
    queue::ingest_queue,
    server::{self, AppState, ShutdownOutcome},
};

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServiceConfig::parse();
    config.validate()?;

    info!(
        window = config.window_capacity,
        threshold = config.z_score_threshold,
        queue = config.queue_capacity,
        field = ?config.observed_field,
        "Initializing pulsewatch"
    );

    let detector = Arc::new(Detector::new(config.detector_config())?);
    let exporter = Arc::new(PrometheusExporter::new(config.observed_field)?);

    let store: Box<dyn SampleStore> = match &config.redis_url {
        Some(url) => Box::new(RedisStore::connect(
            url,
            config.cache_ttl_secs,
            config.cache_recent_limit,
        )?),
        None => {
            info!("REDIS_URL not set, caching samples in memory.");
            Box::new(MemoryStore::new(config.cache_recent_limit))
        }
    };
    let (cache, cache_handle) = CacheForwarder::spawn(store, config.cache_queue_capacity)?;

    let (producer, consumer) = ingest_queue(config.queue_capacity)?;
    let processor = ProcessingLoop::new(consumer, detector.clone(), Some(cache), exporter.clone())
        .spawn()?;

    let state = AppState {
        producer,
        detector,
        exporter,
    };
    let app = server::router(state);

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Server is ready to handle requests.");

    // Serving consumes the router; every producer clone is gone once it
    // returns gracefully. Abandoned connections still hold producers, so the
    // queue cannot be drained.
    match server::serve(listener, app, shutdown_signal(), server::SHUTDOWN_GRACE).await? {
        ShutdownOutcome::Graceful => info!("Ingest closed, draining queue."),
        ShutdownOutcome::TimedOut => {
            warn!(
                grace_secs = server::SHUTDOWN_GRACE.as_secs(),
                "Connections still open after grace period, exiting without draining."
            );
            return Ok(());
        }
    }

    let processed = processor
        .join()
        .map_err(|_| ServiceError::WorkerPanicked("processing loop"))?;
    info!(processed, "Processing loop drained.");

    let report = cache_handle
        .join()
        .map_err(|_| ServiceError::WorkerPanicked("cache writer"))?;
    info!(
        stored = report.stored,
        failed = report.failed,
        "Cache writer flushed. Server stopped."
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Server is shutting down...");
}

//! The single consumer of the ingestion queue.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::cache::CacheHandle;
use crate::detector::Detector;
use crate::metrics::MetricsSink;
use crate::queue::QueueConsumer;

/// Drains the queue in arrival order, feeding each sample to the cache
/// writer, the detector and the metrics sink.
pub struct ProcessingLoop {
    consumer: QueueConsumer,
    detector: Arc<Detector>,
    cache: Option<CacheHandle>,
    sink: Arc<dyn MetricsSink>,
}

impl ProcessingLoop {
    pub fn new(
        consumer: QueueConsumer,
        detector: Arc<Detector>,
        cache: Option<CacheHandle>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            consumer,
            detector,
            cache,
            sink,
        }
    }

    /// Run on a dedicated thread. The handle yields the number of samples processed.
    pub fn spawn(self) -> std::io::Result<thread::JoinHandle<u64>> {
        thread::Builder::new()
            .name("pulsewatch-processor".into())
            .spawn(move || self.run())
    }

    /// Process until every producer is dropped and the queue is empty.
    pub fn run(self) -> u64 {
        info!("Processing loop active.");
        let started = Instant::now();
        let mut processed: u64 = 0;

        while let Some(sample) = self.consumer.recv() {
            let timer = Instant::now();

            if let Some(cache) = &self.cache {
                cache.forward(sample.clone());
            }

            let result = self.detector.analyze(sample);
            self.sink.record(&result);
            self.sink.observe_processing(timer.elapsed().as_secs_f64());

            if result.is_anomaly {
                warn!(
                    device = %result.sample.device_id,
                    z_score = result.z_score,
                    rolling_average = result.rolling_average,
                    "Anomaly detected"
                );
            }

            processed += 1;
            if processed % 10_000 == 0 {
                debug!(processed, backlog = self.consumer.len(), "Processing progress");
            }
        }

        info!(
            processed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Processing loop drained and stopped."
        );
        processed
    }
}

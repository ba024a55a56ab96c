//! Prometheus export of detection and ingress metrics.

use prometheus::{
    Counter, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts,
    Registry, TextEncoder,
};

use crate::model::{AnalysisResult, ObservedField};
use crate::queue::Admission;

/// Receives every analysis result from the processing loop.
pub trait MetricsSink: Send + Sync {
    fn record(&self, result: &AnalysisResult);

    /// Wall time spent on one sample, cache hand-off included.
    fn observe_processing(&self, _seconds: f64) {}
}

pub struct PrometheusExporter {
    registry: Registry,
    observed_field: ObservedField,
    samples_processed: Counter,
    anomalies_detected: Counter,
    current_value: Gauge,
    rolling_average: Gauge,
    ingest_accepted: Counter,
    ingest_rejected: Counter,
    processing_latency: Histogram,
    http_requests: IntCounterVec,
    http_duration: HistogramVec,
}

impl PrometheusExporter {
    pub fn new(observed_field: ObservedField) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let samples_processed = Counter::new(
            "pulsewatch_samples_processed_total",
            "Total samples analysed by the detector",
        )?;
        let anomalies_detected = Counter::new(
            "pulsewatch_anomalies_detected_total",
            "Total anomalies detected",
        )?;
        let current_value = Gauge::new(
            "pulsewatch_current_value",
            "Observed value of the most recent sample",
        )?;
        let rolling_average = Gauge::new(
            "pulsewatch_rolling_average",
            "Rolling average of the observed value",
        )?;
        let ingest_accepted = Counter::new(
            "pulsewatch_ingest_accepted_total",
            "Samples admitted to the ingestion queue",
        )?;
        let ingest_rejected = Counter::new(
            "pulsewatch_ingest_rejected_total",
            "Samples rejected due to backpressure",
        )?;
        let processing_latency = Histogram::with_opts(HistogramOpts::new(
            "pulsewatch_processing_duration_seconds",
            "Histogram of per-sample processing latency",
        ))?;
        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "endpoint", "status"],
        )?;
        let http_duration = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "Duration of HTTP requests"),
            &["method", "endpoint"],
        )?;

        registry.register(Box::new(samples_processed.clone()))?;
        registry.register(Box::new(anomalies_detected.clone()))?;
        registry.register(Box::new(current_value.clone()))?;
        registry.register(Box::new(rolling_average.clone()))?;
        registry.register(Box::new(ingest_accepted.clone()))?;
        registry.register(Box::new(ingest_rejected.clone()))?;
        registry.register(Box::new(processing_latency.clone()))?;
        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(http_duration.clone()))?;

        Ok(Self {
            registry,
            observed_field,
            samples_processed,
            anomalies_detected,
            current_value,
            rolling_average,
            ingest_accepted,
            ingest_rejected,
            processing_latency,
            http_requests,
            http_duration,
        })
    }

    pub fn record_admission(&self, admission: Admission) {
        if admission.is_accepted() {
            self.ingest_accepted.inc();
        } else {
            self.ingest_rejected.inc();
        }
    }

    pub fn observe_http(&self, method: &str, endpoint: &str, status: u16, seconds: f64) {
        let status = status.to_string();
        self.http_requests
            .with_label_values(&[method, endpoint, status.as_str()])
            .inc();
        self.http_duration
            .with_label_values(&[method, endpoint])
            .observe(seconds);
    }

    /// Text exposition of everything in the registry.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl MetricsSink for PrometheusExporter {
    fn record(&self, result: &AnalysisResult) {
        self.samples_processed.inc();
        self.rolling_average.set(result.rolling_average);
        self.current_value.set(result.sample.reading(self.observed_field));
        if result.is_anomaly {
            self.anomalies_detected.inc();
        }
    }

    fn observe_processing(&self, seconds: f64) {
        self.processing_latency.observe(seconds);
    }
}

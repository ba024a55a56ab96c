//! HTTP ingress/egress adapter.
//!
//! Decodes samples, pushes them into the ingestion queue and serves the
//! detector's read-only views. Nothing here touches detector state directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequest, MatchedPath, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::detector::Detector;
use crate::metrics::PrometheusExporter;
use crate::model::{AnalysisResult, AnalyticsStats, Sample};
use crate::queue::{Admission, QueueProducer};

/// Default number of anomalies returned by `GET /analytics/anomalies`.
pub const DEFAULT_ANOMALY_LIMIT: i64 = 10;

/// Largest accepted reading magnitude. Squared deviations of readings within
/// this bound cannot overflow `f64`.
pub const MAX_READING_MAGNITUDE: f64 = 1e150;

/// 503 bodies for the two rejected admissions.
pub const QUEUE_FULL: &str = "queue full";
pub const SHUTTING_DOWN: &str = "shutting down";

// ============================================================================
// DATA TYPES
// ============================================================================

/// Inbound sample. The server assigns the timestamp on arrival.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IngestRequest {
    pub device_id: String,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub rps: f64,
    #[serde(default)]
    pub latency_ms: f64,
}

impl IngestRequest {
    fn validate(&self) -> Result<(), &'static str> {
        if self.device_id.trim().is_empty() {
            return Err("device_id must not be empty");
        }
        let readings = [self.cpu_usage, self.memory_usage, self.rps, self.latency_ms];
        if readings.iter().any(|v| !v.is_finite()) {
            return Err("readings must be finite numbers");
        }
        if readings.iter().any(|v| v.abs() > MAX_READING_MAGNITUDE) {
            return Err("readings must not exceed 1e150 in magnitude");
        }
        Ok(())
    }

    fn into_sample(self) -> Sample {
        Sample {
            timestamp: Utc::now(),
            device_id: self.device_id,
            cpu_usage: self.cpu_usage,
            memory_usage: self.memory_usage,
            rps: self.rps,
            latency_ms: self.latency_ms,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BatchResponse {
    pub accepted: usize,
    pub rejected: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub version: String,
}

#[derive(Deserialize, Debug)]
pub struct AnomaliesQuery {
    pub limit: Option<i64>,
}

#[derive(Clone)]
pub struct AppState {
    pub producer: QueueProducer,
    pub detector: Arc<Detector>,
    pub exporter: Arc<PrometheusExporter>,
}

// ============================================================================
// SIMD-JSON EXTRACTOR
// ============================================================================

struct SimdJson<T>(T);

impl<T, S> FromRequest<S> for SimdJson<T>
where
    T: for<'de> Deserialize<'de> + Send,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| e.into_response())?;
        let mut bytes_vec = bytes.to_vec();

        let val = simd_json::from_slice::<T>(&mut bytes_vec)
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid JSON: {e}")).into_response())?;

        Ok(SimdJson(val))
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn ingest(
    State(state): State<AppState>,
    SimdJson(request): SimdJson<IngestRequest>,
) -> Response {
    if let Err(reason) = request.validate() {
        return (StatusCode::BAD_REQUEST, reason).into_response();
    }

    let admission = state.producer.try_enqueue(request.into_sample());
    state.exporter.record_admission(admission);

    match admission {
        Admission::Accepted => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "accepted" })),
        )
            .into_response(),
        Admission::Full => (StatusCode::SERVICE_UNAVAILABLE, QUEUE_FULL).into_response(),
        Admission::Closed => (StatusCode::SERVICE_UNAVAILABLE, SHUTTING_DOWN).into_response(),
    }
}

async fn ingest_batch(
    State(state): State<AppState>,
    SimdJson(requests): SimdJson<Vec<IngestRequest>>,
) -> Response {
    if let Some((index, reason)) = requests
        .iter()
        .enumerate()
        .find_map(|(i, r)| r.validate().err().map(|reason| (i, reason)))
    {
        return (StatusCode::BAD_REQUEST, format!("item {index}: {reason}")).into_response();
    }

    let mut response = BatchResponse {
        accepted: 0,
        rejected: 0,
    };
    for request in requests {
        let admission = state.producer.try_enqueue(request.into_sample());
        state.exporter.record_admission(admission);
        if admission.is_accepted() {
            response.accepted += 1;
        } else {
            response.rejected += 1;
        }
    }

    (StatusCode::ACCEPTED, Json(response)).into_response()
}

async fn current_stats(State(state): State<AppState>) -> Json<AnalyticsStats> {
    Json(state.detector.current_stats())
}

async fn recent_anomalies(
    State(state): State<AppState>,
    Query(query): Query<AnomaliesQuery>,
) -> Json<Vec<AnalysisResult>> {
    let limit = query.limit.unwrap_or(DEFAULT_ANOMALY_LIMIT).max(0) as usize;
    Json(state.detector.recent_anomalies(limit))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    match state.exporter.encode() {
        Ok(body) => body.into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn track_http(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().to_string();
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());

    let response = next.run(req).await;

    state.exporter.observe_http(
        &method,
        &endpoint,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics/ingest", post(ingest))
        .route("/metrics/ingest/batch", post(ingest_batch))
        .route("/analytics/current", get(current_stats))
        .route("/analytics/anomalies", get(recent_anomalies))
        .route("/metrics/prometheus", get(prometheus_metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_http))
        .with_state(state)
}

// ============================================================================
// SERVING
// ============================================================================

/// How long in-flight connections get to finish once shutdown is signalled.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every connection closed; the router and its producers are dropped.
    Graceful,
    /// Connections outlived the grace period and were abandoned.
    TimedOut,
}

/// Serve `app` until `signal` resolves, then wait at most `grace` for open
/// connections to finish.
pub async fn serve<F>(
    listener: TcpListener,
    app: Router,
    signal: F,
    grace: Duration,
) -> std::io::Result<ShutdownOutcome>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            let _ = signalled_tx.send(());
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        biased;
        res = &mut server => res.map(|()| ShutdownOutcome::Graceful),
        _ = signalled_rx => {
            info!(grace_secs = grace.as_secs_f64(), "Waiting for open connections");
            match tokio::time::timeout(grace, &mut server).await {
                Ok(res) => res.map(|()| ShutdownOutcome::Graceful),
                Err(_) => Ok(ShutdownOutcome::TimedOut),
            }
        }
    }
}

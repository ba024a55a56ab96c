use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use pulsewatch::metrics::PrometheusExporter;
use pulsewatch::pipeline::ProcessingLoop;
use pulsewatch::server::{self, AppState, BatchResponse, HealthResponse, ShutdownOutcome};
use pulsewatch::{
    AnalysisResult, AnalyticsStats, Detector, DetectorConfig, ObservedField, QueueConsumer,
    QueueProducer, ingest_queue,
};
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

struct TestServer {
    base: String,
    _processor: Option<JoinHandle<u64>>,
    // Held undrained when no processing loop runs.
    _consumer: Option<QueueConsumer>,
}

fn app_state(producer: QueueProducer) -> AppState {
    AppState {
        producer,
        detector: Arc::new(Detector::new(DetectorConfig::default()).unwrap()),
        exporter: Arc::new(PrometheusExporter::new(ObservedField::Rps).unwrap()),
    }
}

async fn start_server(queue_capacity: usize, run_processor: bool) -> TestServer {
    let (producer, consumer) = ingest_queue(queue_capacity).unwrap();
    let detector = Arc::new(Detector::new(DetectorConfig::new(50, 2.0)).unwrap());
    let exporter = Arc::new(PrometheusExporter::new(ObservedField::Rps).unwrap());

    let (processor, consumer) = if run_processor {
        let handle = ProcessingLoop::new(consumer, detector.clone(), None, exporter.clone())
            .spawn()
            .unwrap();
        (Some(handle), None)
    } else {
        (None, Some(consumer))
    };

    let app = server::router(AppState {
        producer,
        detector,
        exporter,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        _processor: processor,
        _consumer: consumer,
    }
}

fn sample(rps: f64) -> serde_json::Value {
    serde_json::json!({
        "device_id": "device_1",
        "cpu_usage": 0.5,
        "memory_usage": 0.4,
        "rps": rps,
        "latency_ms": 12.0
    })
}

async fn wait_for_total(client: &Client, base: &str, total: u64) -> AnalyticsStats {
    for _ in 0..200 {
        let stats: AnalyticsStats = client
            .get(format!("{}/analytics/current", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if stats.total_metrics >= total {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("processing loop did not reach {} samples", total);
}

#[tokio::test]
async fn test_ingest_detect_and_query() {
    let server = start_server(1000, true).await;
    let client = Client::new();
    let ingest = format!("{}/metrics/ingest", server.base);

    for _ in 0..21 {
        let res = client.post(&ingest).json(&sample(100.0)).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["status"], "accepted");
    }
    let res = client.post(&ingest).json(&sample(500.0)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let stats = wait_for_total(&client, &server.base, 22).await;
    assert_eq!(stats.total_metrics, 22);
    assert_eq!(stats.total_anomalies, 1);
    assert_eq!(stats.current_value, 500.0);
    assert_eq!(stats.window_size, 50);
    assert_eq!(stats.z_score_threshold, 2.0);
    assert!(stats.last_anomaly_time.is_some());

    let anomalies: Vec<AnalysisResult> = client
        .get(format!("{}/analytics/anomalies", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(anomalies.len(), 1);
    assert!(anomalies[0].is_anomaly);
    assert!(anomalies[0].z_score > 2.0);
    assert_eq!(anomalies[0].sample.rps, 500.0);
    assert_eq!(anomalies[0].sample.latency_ms, 12.0);

    let none: Vec<AnalysisResult> = client
        .get(format!("{}/analytics/anomalies?limit=-5", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(none.is_empty());

    // The sink is updated just after the detector; poll until it catches up.
    let mut metrics = String::new();
    for _ in 0..200 {
        metrics = client
            .get(format!("{}/metrics/prometheus", server.base))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        if metrics.contains("pulsewatch_samples_processed_total 22") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(metrics.contains("pulsewatch_samples_processed_total 22"));
    assert!(metrics.contains("pulsewatch_anomalies_detected_total 1"));
    assert!(metrics.contains("pulsewatch_ingest_accepted_total 22"));
    assert!(metrics.contains("http_requests_total"));
}

#[tokio::test]
async fn test_full_queue_returns_service_unavailable() {
    let server = start_server(2, false).await;
    let client = Client::new();
    let ingest = format!("{}/metrics/ingest", server.base);

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let res = client.post(&ingest).json(&sample(100.0)).send().await.unwrap();
        statuses.push(res.status());
    }

    assert_eq!(
        statuses,
        [
            StatusCode::ACCEPTED,
            StatusCode::ACCEPTED,
            StatusCode::SERVICE_UNAVAILABLE
        ]
    );
}

#[tokio::test]
async fn test_batch_reports_admission_counts() {
    let server = start_server(3, false).await;
    let client = Client::new();

    let batch: Vec<_> = (0..5).map(|i| sample(100.0 + i as f64)).collect();
    let res = client
        .post(format!("{}/metrics/ingest/batch", server.base))
        .json(&batch)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: BatchResponse = res.json().await.unwrap();
    assert_eq!(body, BatchResponse { accepted: 3, rejected: 2 });
}

#[tokio::test]
async fn test_malformed_input_is_rejected() {
    let server = start_server(10, false).await;
    let client = Client::new();
    let ingest = format!("{}/metrics/ingest", server.base);

    let res = client
        .post(&ingest)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(&ingest)
        .json(&serde_json::json!({ "device_id": "", "rps": 1.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(format!("{}/metrics/ingest/batch", server.base))
        .json(&serde_json::json!([{ "device_id": "ok", "rps": 1.0 }, { "rps": 2.0 }]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health() {
    let server = start_server(10, false).await;

    let res = Client::new()
        .get(format!("{}/health", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let health: HealthResponse = res.json().await.unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_ingest_after_consumer_stopped() {
    let (producer, consumer) = ingest_queue(10).unwrap();
    drop(consumer);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server::router(app_state(producer));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let res = Client::new()
        .post(format!("http://{}/metrics/ingest", addr))
        .json(&sample(100.0))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.text().await.unwrap(), server::SHUTTING_DOWN);
}

#[tokio::test]
async fn test_graceful_shutdown_releases_producers() {
    let (producer, consumer) = ingest_queue(10).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let app = server::router(app_state(producer));

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let serving = tokio::spawn(server::serve(
        listener,
        app,
        async move {
            let _ = stop_rx.await;
        },
        Duration::from_secs(5),
    ));

    stop_tx.send(()).unwrap();
    let outcome = serving.await.unwrap().unwrap();
    assert_eq!(outcome, ShutdownOutcome::Graceful);
    assert!(consumer.recv().is_none());
}

#[tokio::test]
async fn test_shutdown_abandons_stalled_connections() {
    let (producer, _consumer) = ingest_queue(10).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server::router(app_state(producer));

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let serving = tokio::spawn(server::serve(
        listener,
        app,
        async move {
            let _ = stop_rx.await;
        },
        Duration::from_millis(200),
    ));

    // Announce a body that never arrives.
    let mut stalled = TcpStream::connect(addr).await.unwrap();
    stalled
        .write_all(
            b"POST /metrics/ingest HTTP/1.1\r\nHost: localhost\r\n\
              Content-Type: application/json\r\nContent-Length: 100\r\n\r\n{\"device_id\"",
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    stop_tx.send(()).unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .expect("shutdown exceeded its grace period")
        .unwrap()
        .unwrap();
    assert_eq!(outcome, ShutdownOutcome::TimedOut);
    drop(stalled);
}

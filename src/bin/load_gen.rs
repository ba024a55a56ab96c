use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use pulsewatch::model::AnalyticsStats;
use pulsewatch::server::IngestRequest;
use tokio::sync::Mutex;
use tokio::time;

#[derive(Parser)]
#[command(name = "load_gen")]
#[command(about = "Concurrent HTTP load generator for pulsewatch")]
struct Args {
    /// Base URL of the service
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    url: String,

    /// Concurrent workers
    #[arg(short, long, default_value = "10")]
    concurrency: usize,

    /// Test duration in seconds
    #[arg(short, long, default_value = "30")]
    duration_secs: u64,

    /// Random pause between requests per worker, upper bound in milliseconds
    #[arg(long, default_value = "10")]
    max_pause_ms: u64,
}

fn random_sample() -> IngestRequest {
    IngestRequest {
        device_id: format!("device_{}", fastrand::u32(1..=1000)),
        cpu_usage: 0.1 + fastrand::f64() * 0.8,
        memory_usage: 0.1 + fastrand::f64() * 0.7,
        rps: 100.0 + fastrand::f64() * 900.0,
        latency_ms: 1.0 + fastrand::f64() * 99.0,
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * p) as usize).min(sorted.len() - 1);
    sorted[idx]
}

#[tokio::main]
async fn main() -> Result<(), reqwest::Error> {
    let args = Args::parse();
    let ingest_url = format!("{}/metrics/ingest", args.url);
    let duration = Duration::from_secs(args.duration_secs);

    println!("pulsewatch load generator");
    println!("Target: {} | Workers: {} | Duration: {:?}", ingest_url, args.concurrency, duration);

    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(args.concurrency)
        .timeout(Duration::from_secs(5))
        .tcp_nodelay(true)
        .build()?;

    let accepted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let latencies = Arc::new(Mutex::new(Vec::<f64>::new()));
    let start_time = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..args.concurrency {
        let client = client.clone();
        let url = ingest_url.clone();
        let accepted = accepted.clone();
        let rejected = rejected.clone();
        let failed = failed.clone();
        let latencies = latencies.clone();
        let max_pause_ms = args.max_pause_ms;

        handles.push(tokio::spawn(async move {
            while start_time.elapsed() < duration {
                let sent = Instant::now();
                match client.post(&url).json(&random_sample()).send().await {
                    Ok(resp) if resp.status() == reqwest::StatusCode::ACCEPTED => {
                        accepted.fetch_add(1, Ordering::Relaxed);
                        latencies.lock().await.push(sent.elapsed().as_secs_f64() * 1000.0);
                    }
                    Ok(resp) if resp.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE => {
                        rejected.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(_) | Err(_) => {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }

                if max_pause_ms > 0 {
                    time::sleep(Duration::from_millis(fastrand::u64(1..=max_pause_ms))).await;
                }
            }
        }));
    }

    // Monitor Loop
    let monitor_total = accepted.clone();
    let monitor = tokio::spawn(async move {
        let mut last_count = 0;
        loop {
            time::sleep(Duration::from_secs(1)).await;
            let current = monitor_total.load(Ordering::Relaxed);
            println!(
                "[{:02}s] accepted/s: {:<8} | total: {}",
                start_time.elapsed().as_secs(),
                current - last_count,
                current
            );
            last_count = current;

            if start_time.elapsed() >= duration {
                break;
            }
        }
    });

    for h in handles {
        let _ = h.await;
    }
    let _ = monitor.await;

    let elapsed = start_time.elapsed();
    let accepted = accepted.load(Ordering::SeqCst);
    let rejected = rejected.load(Ordering::SeqCst);
    let failed = failed.load(Ordering::SeqCst);
    let total = accepted + rejected + failed;

    let mut latencies = latencies.lock().await.clone();
    latencies.sort_by(f64::total_cmp);
    let mean = if latencies.is_empty() {
        0.0
    } else {
        latencies.iter().sum::<f64>() / latencies.len() as f64
    };

    println!("\n=== Load Test Report ===");
    println!("Total requests:   {}", total);
    println!("Accepted (202):   {}", accepted);
    println!("Rejected (503):   {}", rejected);
    println!("Failed:           {}", failed);
    println!("Duration:         {:.2?}", elapsed);
    println!("Throughput:       {:.0} req/s", total as f64 / elapsed.as_secs_f64());
    if total > 0 {
        println!("Success rate:     {:.2}%", accepted as f64 / total as f64 * 100.0);
    }
    println!("\nLatency (ms):");
    println!("  mean: {:.2}", mean);
    println!("  p50:  {:.2}", percentile(&latencies, 0.50));
    println!("  p95:  {:.2}", percentile(&latencies, 0.95));
    println!("  p99:  {:.2}", percentile(&latencies, 0.99));

    let stats_url = format!("{}/analytics/current", args.url);
    match client.get(&stats_url).send().await {
        Ok(resp) => match resp.json::<AnalyticsStats>().await {
            Ok(stats) => {
                println!("\n=== Service Analytics ===");
                println!("Current value:    {:.2}", stats.current_value);
                println!("Rolling average:  {:.2}", stats.rolling_average);
                println!("Anomaly rate:     {:.2}%", stats.anomaly_rate * 100.0);
                println!("Total samples:    {}", stats.total_metrics);
                println!("Total anomalies:  {}", stats.total_anomalies);
                if let Some(t) = stats.last_anomaly_time {
                    println!("Last anomaly:     {}", t);
                }
            }
            Err(e) => println!("Failed to decode analytics: {}", e),
        },
        Err(e) => println!("Failed to fetch analytics: {}", e),
    }

    Ok(())
}

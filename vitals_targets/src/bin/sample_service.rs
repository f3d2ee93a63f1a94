//! Instrumented sample service.
//!
//! Registers a latency histogram, a request counter, and a queue-depth
//! gauge, exposes them over the pull server (and optionally a push daemon),
//! then runs a simulated workload until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::time::Instant;
use tracing::{info, Level};

use vitals_core::{buckets, ExpositionConfig, Metric, Registry};
use vitals_http::{PullServer, PushDaemon};

#[derive(Parser)]
#[command(name = "sample_service")]
#[command(about = "Sample service exposing vitals metrics over pull and push", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a YAML exposition config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen port (overrides the config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Push snapshots to this URL (overrides the config)
    #[arg(long)]
    push_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ExpositionConfig::from_yaml(&std::fs::read_to_string(path)?)?,
        None => ExpositionConfig::default(),
    };
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.push_url.is_some() {
        config.push_url = cli.push_url.clone();
    }

    let registry = Arc::new(Registry::new(config.lock_discipline));
    let loop_latency = registry.histogram(
        "sample_loop_duration_microseconds",
        "Time between workload iterations",
        buckets::exponential(1.0, 1.3, 40)?,
    )?;
    let requests = registry.counter("sample_requests_total", "Simulated requests handled")?;
    let queue_depth = registry.gauge("sample_queue_depth", "Simulated queue depth")?;

    let mut pull =
        PullServer::start(registry.clone(), config.port, config.accept_policy).await?;
    let mut push = match &config.push_url {
        Some(url) => {
            Some(PushDaemon::start(registry.clone(), url, config.push_interval).await?)
        }
        None => None,
    };

    info!(
        "Scrape endpoint ready at http://{}/metrics",
        pull.local_addr()
    );

    let workload = tokio::spawn(run_workload(loop_latency, requests, queue_depth));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    workload.abort();
    if let Some(daemon) = push.as_mut() {
        daemon.stop().await;
    }
    pull.stop().await;
    registry.destroy();
    Ok(())
}

async fn run_workload(
    loop_latency: Arc<Metric>,
    requests: Arc<Metric>,
    queue_depth: Arc<Metric>,
) {
    let mut rng = StdRng::from_entropy();
    let mut prev = Instant::now();
    loop {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let elapsed = prev.elapsed();
        prev = Instant::now();

        let updated = loop_latency
            .observe(elapsed.as_micros() as f64)
            .and_then(|_| requests.inc())
            .and_then(|_| queue_depth.set(rng.gen_range(0.0..64.0)));
        if updated.is_err() {
            // The registry has been torn down.
            break;
        }
    }
}

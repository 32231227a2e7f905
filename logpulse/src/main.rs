// logpulse/src/main.rs
//
// logpulse — real-time log anomaly detection and triage daemon.
//
// Boot order: durable control registry, vector gateway (Tier-1 reset +
// today's Tier-2 partition), service graph, periodic rhythm worker, HTTP
// API. Unreachable registry or vector store at startup is fatal.
//
// Usage:
//   logpulse                                  # env-driven configuration
//   logpulse --bind 127.0.0.1:9000
//   logpulse --registry-path /var/lib/logpulse/registry.db --interval-sec 60

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use logpulse::analyzer::RhythmAnalyzer;
use logpulse::api::{self, AppState};
use logpulse::config::Config;
use logpulse::control::ControlRegistry;
use logpulse::evals::EvalCapture;
use logpulse::fingerprint::Fingerprinter;
use logpulse::forensic::ForensicQuery;
use logpulse::gateway::memory::MemoryBackend;
use logpulse::gateway::{GatewayConfig, VectorGateway};
use logpulse::ingest::IngestionPipeline;
use logpulse::promote::PromotionService;
use logpulse::worker;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "logpulse",
    about   = "Real-time log anomaly detection and forensic triage",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, help = "HTTP bind address (overrides LOGPULSE_BIND_ADDR)")]
    bind: Option<String>,

    #[arg(long, help = "Control-registry database path")]
    registry_path: Option<PathBuf>,

    #[arg(long, help = "Analysis window and worker cadence in seconds")]
    interval_sec: Option<u64>,

    #[arg(long, help = "Append the semantic segment to fingerprints")]
    semantic_hash: bool,
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("logpulse=info".parse()?),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let mut cfg = Config::from_env();
    if let Some(bind) = cli.bind {
        cfg.bind_addr = bind;
    }
    if let Some(path) = cli.registry_path {
        cfg.registry_db_path = path;
    }
    if let Some(interval) = cli.interval_sec {
        cfg.analysis_interval_sec = interval;
    }
    if cli.semantic_hash {
        cfg.semantic_hash = true;
    }

    info!(
        bind = %cfg.bind_addr,
        vector_host = %cfg.vector_host,
        vector_port = cfg.vector_port,
        interval_sec = cfg.analysis_interval_sec,
        "logpulse starting"
    );

    // Durable registry first: patches must be in memory before any analysis.
    let control = Arc::new(
        ControlRegistry::open(&cfg.registry_db_path, EvalCapture::new(&cfg.evals_dir))
            .await
            .context("control registry unreachable")?,
    );

    let gateway = Arc::new(VectorGateway::new(
        Arc::new(MemoryBackend::new()),
        GatewayConfig {
            tier1_collection:   cfg.tier1_collection_prefix.clone(),
            tier2_prefix:       cfg.tier2_collection_prefix.clone(),
            replication_factor: cfg.replication_factor,
            shard_number:       cfg.shard_number,
            rpc_deadline:       Duration::from_secs(30),
        },
    ));
    gateway
        .setup_collections(Utc::now().timestamp())
        .await
        .context("vector store unreachable")?;

    let fingerprinter = Fingerprinter::new(cfg.semantic_hash);
    let pipeline = Arc::new(IngestionPipeline::new(Arc::clone(&gateway), fingerprinter));
    let analyzer = Arc::new(RhythmAnalyzer::new(
        Arc::clone(&gateway),
        Arc::clone(&control),
        PromotionService::new(Arc::clone(&gateway)),
    ));
    let forensic = Arc::new(ForensicQuery::new(
        Arc::clone(&gateway),
        Arc::clone(&control),
    ));

    // Background rhythm worker.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = tokio::spawn(worker::run_analysis_loop(
        Arc::clone(&analyzer),
        cfg.analysis_interval_sec,
        shutdown_rx,
    ));

    // Stats heartbeat.
    let stats_pipeline = Arc::clone(&pipeline);
    let stats_analyzer = Arc::clone(&analyzer);
    let start = Instant::now();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(30)).await;
            info!(
                uptime_sec = start.elapsed().as_secs(),
                ingested = stats_pipeline.total_ingested(),
                analyses = stats_analyzer.runs(),
                "stats"
            );
        }
    });

    let state = AppState {
        pipeline,
        analyzer,
        forensic,
        control,
        live_log_path: cfg.live_log_path.clone(),
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", cfg.bind_addr))?;
    info!(addr = %cfg.bind_addr, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // Stop the worker; give in-flight promotion a bounded grace period.
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(5), worker_handle)
        .await
        .is_err()
    {
        warn!("worker did not stop within grace period");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "shutdown signal listener failed");
    }
}

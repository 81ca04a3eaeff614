//! reelsmith binary.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reel_adapters::{
    ElevenLabsAdapter, ElevenLabsConfig, OpenAiAdapter, OpenAiConfig, PexelsAdapter, PexelsConfig,
    TmdbAdapter, TmdbConfig, YouTubeAdapter, YouTubeConfig,
};
use reel_media::{ComposeSettings, FfmpegCompositor, FfmpegRunner};
use reel_models::RunId;
use reel_storage::RunStore;
use reel_worker::health::{all_healthy, probe_adapter, probe_compositor, ProbeReport};
use reel_worker::metrics::init_metrics;
use reel_worker::{
    Adapters, Pipeline, PipelineSettings, RunOutcome, Scheduler, SchedulerSettings, WorkerConfig,
};

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing();

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr: SocketAddr = addr.parse().context("METRICS_ADDR is not a socket address")?;
        init_metrics(addr)?;
        info!(%addr, "Prometheus exporter listening");
    }

    let mut config = WorkerConfig::from_env()?;
    if let Some(dir) = cli.work_dir {
        config.work_dir = dir;
    }

    let ok = match cli.command {
        Commands::RunOnce => run_once(&config).await?,
        Commands::RunScheduled { max_triggers } => run_scheduled(&config, max_triggers).await?,
        Commands::TestAdapters => test_adapters().await,
        Commands::Resume { run_id } => resume(&config, RunId::from_string(run_id)).await?,
        Commands::Status => status(&config).await?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Colored output for dev, JSON for production.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reel_worker=info,reel_adapters=info,reel_media=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Shutdown channel flipped by Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, finishing current stages");
            let _ = tx.send(true);
        }
        // Keep the sender alive so receivers never see a closed channel.
        std::future::pending::<()>().await;
    });
    rx
}

fn build_adapters(config: &WorkerConfig) -> anyhow::Result<Adapters> {
    let runner = FfmpegRunner::new().with_timeout(config.long_call_timeout.as_secs());
    Ok(Adapters {
        subject: Arc::new(TmdbAdapter::new(TmdbConfig::from_env()?)?),
        script: Arc::new(OpenAiAdapter::new(OpenAiConfig::from_env()?)?),
        narration: Arc::new(ElevenLabsAdapter::new(ElevenLabsConfig::from_env()?)?),
        visuals: Arc::new(PexelsAdapter::new(PexelsConfig::from_env()?)?),
        upload: Arc::new(YouTubeAdapter::new(YouTubeConfig::from_env()?)?),
        compositor: Arc::new(FfmpegCompositor::new(runner, ComposeSettings::default())),
    })
}

async fn build_pipeline(config: &WorkerConfig, shutdown: watch::Receiver<bool>) -> anyhow::Result<Pipeline> {
    let store = RunStore::open(&config.work_dir, config.retention)
        .await
        .with_context(|| format!("opening run store at {}", config.work_dir.display()))?;
    let adapters = build_adapters(config).context("configuring adapters")?;
    Ok(Pipeline::new(
        Arc::new(store),
        adapters,
        PipelineSettings::from_config(config),
        shutdown,
    ))
}

fn report_outcome(run_id: &RunId, outcome: &RunOutcome) -> bool {
    match outcome {
        RunOutcome::Published { video_id } => {
            info!(run_id = %run_id, video_id = %video_id, "Published");
            true
        }
        RunOutcome::Failed(reason) => {
            error!(run_id = %run_id, reason = %reason, "Run failed");
            false
        }
        RunOutcome::Interrupted => {
            warn!(run_id = %run_id, "Run interrupted; continue it with `reelsmith resume {}`", run_id);
            false
        }
    }
}

async fn run_once(config: &WorkerConfig) -> anyhow::Result<bool> {
    let pipeline = build_pipeline(config, shutdown_signal()).await?;
    let (run_id, outcome) = pipeline.start(config.run_request()).await?;
    Ok(report_outcome(&run_id, &outcome))
}

async fn run_scheduled(config: &WorkerConfig, max_triggers: Option<u32>) -> anyhow::Result<bool> {
    info!("Starting reelsmith scheduler");
    let shutdown = shutdown_signal();
    let pipeline = Arc::new(build_pipeline(config, shutdown.clone()).await?);
    let mut scheduler = Scheduler::new(
        pipeline,
        SchedulerSettings::from_config(config),
        config.run_request(),
        shutdown,
    );
    let report = scheduler.run(max_triggers).await?;
    info!(
        triggers = report.triggers,
        published = report.published,
        failed = report.failed,
        "Scheduler shutdown complete"
    );
    Ok(true)
}

async fn resume(config: &WorkerConfig, run_id: RunId) -> anyhow::Result<bool> {
    let pipeline = build_pipeline(config, shutdown_signal()).await?;
    let outcome = pipeline.resume(&run_id).await?;
    Ok(report_outcome(&run_id, &outcome))
}

/// Probe every adapter; a missing credential counts as a failure.
async fn test_adapters() -> bool {
    let mut reports = Vec::new();

    reports.push(match TmdbConfig::from_env().and_then(TmdbAdapter::new) {
        Ok(adapter) => probe_adapter(&adapter).await,
        Err(e) => ProbeReport::from_error("tmdb", &e),
    });
    reports.push(match OpenAiConfig::from_env().and_then(OpenAiAdapter::new) {
        Ok(adapter) => probe_adapter(&adapter).await,
        Err(e) => ProbeReport::from_error("openai", &e),
    });
    reports.push(match ElevenLabsConfig::from_env().and_then(ElevenLabsAdapter::new) {
        Ok(adapter) => probe_adapter(&adapter).await,
        Err(e) => ProbeReport::from_error("elevenlabs", &e),
    });
    reports.push(match PexelsConfig::from_env().and_then(PexelsAdapter::new) {
        Ok(adapter) => probe_adapter(&adapter).await,
        Err(e) => ProbeReport::from_error("pexels", &e),
    });
    reports.push(match YouTubeConfig::from_env().and_then(YouTubeAdapter::new) {
        Ok(adapter) => probe_adapter(&adapter).await,
        Err(e) => ProbeReport::from_error("youtube", &e),
    });
    reports.push(probe_compositor(&FfmpegCompositor::default()).await);

    for report in &reports {
        println!("{}", report);
    }
    all_healthy(&reports)
}

async fn status(config: &WorkerConfig) -> anyhow::Result<bool> {
    let store = RunStore::open(&config.work_dir, config.retention).await?;
    let runs = store.list_runs().await?;
    if runs.is_empty() {
        println!("no runs in {}", config.work_dir.display());
        return Ok(true);
    }
    for run in runs {
        let detail = run
            .failure_code()
            .or_else(|| run.published_id.clone())
            .unwrap_or_default();
        println!("{:<32} {:<18} {}", run.id.as_str(), run.status.as_str(), detail);
    }
    Ok(true)
}

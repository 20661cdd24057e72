//! SC metrics agent daemon
//!
//! Long-running telemetry agent: samples Linux performance counters on a
//! cadence, stamps them with the VM identity and operator labels, and
//! pushes compressed batches to the remote ingestor. Three cadences run
//! under one cancellation scope: the metric pipeline, the auth token
//! refresh, and the hourly self-update probe.

mod build_info;
mod updater;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use sc_agent_collector::{CollectorRegistry, ProcPaths};
use sc_agent_config::{AgentConfig, LogLevel};
use sc_agent_ingest::{AuthManager, IngestClient, IngestClientConfig, MetadataClient};
use sc_agent_processor::{Decorator, Pipeline, PipelineError};

/// Cadence of the package update probe.
const UPDATE_PROBE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Parser)]
#[command(
    name = "sc-metrics-agent",
    about = "SC metrics agent - pushes VM performance counters to the timeseries ingestor",
    disable_version_flag = true
)]
struct Cli {
    /// Print version information and exit
    #[arg(short = 'v')]
    version: bool,

    /// Validate a configuration file and exit
    #[arg(long = "validate-config", value_name = "PATH")]
    validate_config: Option<PathBuf>,

    /// Path to the configuration file (also settable via SC_AGENT_CONFIG)
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.version {
        print!(
            "Version: {}\nCommit: {}\nBuildTime: {}\n",
            build_info::VERSION,
            build_info::COMMIT,
            build_info::BUILD_TIME
        );
        return;
    }

    if let Some(path) = cli.validate_config {
        match AgentConfig::load(Some(path)) {
            Ok(_) => println!("Configuration is valid"),
            Err(error) => {
                eprintln!("Configuration validation failed: {error}");
                std::process::exit(1);
            }
        }
        return;
    }

    if let Err(error) = run(cli.config).await {
        eprintln!("Error: {error:#}");
        std::process::exit(1);
    }
}

async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = AgentConfig::load(config_path).context("failed to load configuration")?;

    init_tracing(config.log_level);

    info!(
        version = build_info::VERSION,
        collection_interval_secs = config.collection_interval.as_secs(),
        vm_id = %config.vm_id,
        collectors = ?config.collectors,
        "Starting SC metrics agent"
    );

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let pipeline = build_pipeline(&config, &cancel)
        .await
        .context("failed to initialize pipeline")?;

    run_loop(&pipeline, &config, &cancel).await;

    pipeline.close();
    info!("Agent shutdown complete");
    Ok(())
}

/// Wire the registry, decorator, clients and pipeline from the validated
/// configuration, and start the auth refresh cadence.
async fn build_pipeline(
    config: &AgentConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<Pipeline> {
    let registry = CollectorRegistry::new(&config.collectors, ProcPaths::default())
        .context("failed to build collector registry")?;

    let metadata = Arc::new(
        MetadataClient::new(&config.metadata_service_endpoint, config.http_timeout)
            .context("failed to build metadata client")?,
    );
    let auth = Arc::new(AuthManager::new(
        metadata,
        &config.vm_id,
        config.max_retries,
        config.retry_interval,
    ));

    // Eager token fetch; a failure here is not fatal, the pipeline keeps
    // dropping ticks until the refresh cadence succeeds.
    if let Err(error) = auth.ensure_valid_token(cancel).await {
        error!(%error, "Failed to get initial auth token");
    }
    auth.start_refresh(cancel.clone());
    info!("Auth refresh loop started");

    let writer = IngestClient::new(
        IngestClientConfig {
            timeout: config.http_timeout,
            max_retries: config.max_retries,
            retry_delay: config.retry_interval,
            version: build_info::VERSION.to_string(),
        },
        auth.clone(),
    )
    .context("failed to build ingest client")?;

    let decorator = Decorator::new(&config.vm_id, config.labels.clone());

    Ok(Pipeline::new(
        registry,
        decorator,
        writer,
        auth,
        build_info::VERSION,
        config.batch_size,
    ))
}

/// The main select loop. Ticks are processed on this task, so a tick
/// still running when the next firing arrives simply causes that firing
/// to be skipped; ticks are never concurrent.
async fn run_loop(pipeline: &Pipeline, config: &AgentConfig, cancel: &CancellationToken) {
    let mut ticker = tokio::time::interval(config.collection_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The immediate first firing would sample before the host settles.
    ticker.tick().await;

    let mut update_ticker = tokio::time::interval(UPDATE_PROBE_INTERVAL);
    update_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    update_ticker.tick().await;

    info!("Agent started successfully");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if cancel.is_cancelled() {
                    break;
                }
                if let Err(error) = pipeline.process(cancel).await {
                    error!(%error, "Failed to process metrics pipeline");
                    // Report the failed tick on the diagnostics path,
                    // unless there is no token to send it with.
                    if !matches!(error, PipelineError::AuthUnavailable) {
                        pipeline.write_diagnostics(cancel).await;
                    }
                }
            }
            _ = update_ticker.tick() => {
                updater::check_for_updates().await;
            }
            _ = cancel.cancelled() => {
                info!("Shutdown requested, stopping tick loop");
                break;
            }
        }
    }
}

/// Cancel the root scope on SIGINT or SIGTERM. No other signals are
/// intercepted.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install SIGINT handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT"),
            _ = terminate => info!("Received SIGTERM"),
        }

        cancel.cancel();
    });
}

fn init_tracing(level: LogLevel) {
    let filter = tracing_subscriber::EnvFilter::new(level.as_filter_str());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json().with_target(false))
        .init();
}

//! SDS Controller
//!
//! Serves the framed controller RPC for the API server and dock agents, plus
//! the operator HTTP surface for health, metrics and workflow task state.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sds_controller::config::parse_duration;
use sds_controller::controlplane::policy::PolicyEngine;
use sds_controller::store::DockRouteFile;
use sds_controller::{
    Catalog, ControllerConfig, ControllerMetrics, ControllerServer, DockRegistry, MemoryStore,
    OpsServer, Orchestrator, ProfileRegistry, RpcDockClient, TaskQueue,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage control plane controller
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "SDS_CONFIG")]
    config: Option<PathBuf>,

    /// Controller RPC bind address
    #[arg(long, env = "SDS_API_ENDPOINT")]
    api_endpoint: Option<String>,

    /// Operator HTTP bind address
    #[arg(long, env = "SDS_OPS_ENDPOINT")]
    ops_endpoint: Option<String>,

    /// Log flush interval (e.g. "5s")
    #[arg(long, env = "SDS_LOG_FLUSH_FREQUENCY")]
    log_flush_frequency: Option<String>,

    /// Run as a daemon (JSON logs)
    #[arg(long, env = "SDS_DAEMON")]
    daemon: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Tokio worker threads
    #[arg(long, env = "SDS_WORKER_THREADS")]
    worker_threads: Option<usize>,

    /// Dock route seed file
    #[arg(long, env = "SDS_DOCK_ROUTE_FILE")]
    dock_route_file: Option<PathBuf>,
}

impl Args {
    /// File values first, then CLI overrides
    fn resolve(&self) -> anyhow::Result<ControllerConfig> {
        let mut config = match &self.config {
            Some(path) => ControllerConfig::load(path)?,
            None => ControllerConfig::default(),
        };
        if let Some(addr) = &self.api_endpoint {
            config.listen_addr = addr.clone();
        }
        if let Some(addr) = &self.ops_endpoint {
            config.ops_addr = addr.clone();
        }
        if let Some(raw) = &self.log_flush_frequency {
            config.log_flush_frequency = parse_duration(raw)?;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(threads) = self.worker_threads {
            config.worker_threads = threads;
        }
        if let Some(path) = &self.dock_route_file {
            config.dock_route_file = Some(path.clone());
        }
        config.daemon |= self.daemon;
        config.log_json |= self.log_json || config.daemon;
        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.resolve().context("invalid configuration")?;

    init_logging(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .context("failed to build runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: ControllerConfig) -> anyhow::Result<()> {
    info!("Starting SDS controller");
    info!("  Version: {}", sds_controller::VERSION);
    info!("  Controller RPC: {}", config.listen_addr);
    info!("  Ops API: {}", config.ops_addr);
    info!("  Worker threads: {}", config.worker_threads);

    let catalog = Catalog::new(Arc::new(MemoryStore::new()));

    let route_file = config.dock_route_file.clone().map(DockRouteFile::new);
    let docks = DockRegistry::new(catalog.clone(), route_file);
    docks.init().await.context("failed to load docks")?;

    let policy = PolicyEngine::new(config.workflow.retry_policy());
    let profiles = ProfileRegistry::new(catalog.clone(), policy.clone());
    let default_profile = profiles.ensure_default().await?;
    info!("Default profile {} ready", default_profile.id);

    let metrics = ControllerMetrics::new()?;
    let tasks = TaskQueue::new(config.workflow.queue_capacity, metrics.clone());
    let failure_logger = tasks.spawn_failure_logger();

    let dock_client = Arc::new(RpcDockClient::new(config.dock_rpc_timeout));
    let orchestrator = Orchestrator::new(
        catalog,
        docks.clone(),
        profiles,
        policy,
        dock_client,
        tasks.clone(),
        metrics,
    );

    let shutdown = CancellationToken::new();

    let ops = Arc::new(OpsServer::new(config.ops_socket()?, orchestrator.clone()));
    let ops_task = {
        let ops = ops.clone();
        tokio::spawn(async move {
            if let Err(e) = ops.run().await {
                error!("Ops server error: {}", e);
            }
        })
    };

    let server = ControllerServer::bind(
        config.listen_socket()?,
        orchestrator,
        config.max_concurrent_requests,
    )
    .await
    .context("failed to bind controller listener")?;
    let server_task = tokio::spawn(server.serve(shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    shutdown.cancel();
    ops.shutdown();
    match server_task.await {
        Ok(Err(e)) => error!("Controller server error: {}", e),
        Err(e) => error!("Controller server task failed: {}", e),
        Ok(Ok(())) => {}
    }
    let _ = ops_task.await;

    tasks.shutdown().await;
    if let Some(logger) = failure_logger {
        logger.abort();
    }
    if let Err(e) = docks.flush().await {
        warn!("Failed to flush dock routes: {}", e);
    }

    info!("Controller shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(config: &ControllerConfig) {
    let level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "tower_http=info", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

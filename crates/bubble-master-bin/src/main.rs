//! Master process entry point: loads `master.yml`, reloads every persisted
//! job under `--jobs-root`, and serves both the Master↔Worker RPC surface
//! and the `/api/v1/` JSON API off one `axum` listener.

mod api;
mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bubble_master::Master;
use clap::Parser;

use crate::config::MasterConfig;

/// A worker is presumed crashed or partitioned after missing this many
/// consecutive 5s workload broadcasts (see `spawn_workload_broadcast`).
const WORKER_STALE_TIMEOUT: Duration = Duration::from_secs(20);
const WORKER_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "bubble-master", about = "Bubble distributed job-execution master")]
struct Args {
    /// Path to the master configuration file.
    #[arg(long, env = "BUBBLE_MASTER_CONFIG", default_value = "./master.yml")]
    config: PathBuf,

    /// Address the RPC + HTTP API listener binds to. Overrides `web.port`
    /// from the config file when set.
    #[arg(long, env = "BUBBLE_MASTER_BIND")]
    bind: Option<SocketAddr>,

    /// Root directory jobs are persisted under.
    #[arg(long, env = "BUBBLE_MASTER_JOBS_ROOT", default_value = "./jobs")]
    jobs_root: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let config_bytes =
        tokio::fs::read(&args.config).await.with_context(|| format!("reading {}", args.config.display()))?;
    let config: MasterConfig =
        serde_yaml::from_slice(&config_bytes).with_context(|| format!("parsing {}", args.config.display()))?;

    let bind = args.bind.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], config.web.port)));

    let master = Master::new(args.jobs_root);
    master.load_jobs().await.context("reloading persisted jobs")?;
    tracing::info!(jobs = master.list_jobs().len(), "reloaded jobs from disk");

    spawn_worker_liveness_sweep(master.clone());

    let rpc_router = bubble_proto::serve_master(master.clone() as Arc<dyn bubble_proto::MasterApi>);
    let api_router = api::router(master.clone());
    let app = axum::Router::new().merge(rpc_router).nest("/api/v1", api_router);

    let listener = tokio::net::TcpListener::bind(bind).await.with_context(|| format!("binding {bind}"))?;
    tracing::info!(%bind, "bubble-master listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.context("serving")?;

    Ok(())
}

/// Periodically evict workers that have stopped broadcasting, so a stuck
/// `Ctx::result` wait surfaces as an INTERRUPT instead of hanging forever.
fn spawn_worker_liveness_sweep(master: Arc<Master>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(WORKER_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            master.sweep_stale_workers(WORKER_STALE_TIMEOUT).await;
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(?err, "failed to install ctrl-c handler");
    }
    tracing::info!("shutdown signal received");
}

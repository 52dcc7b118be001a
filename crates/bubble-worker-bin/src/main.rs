//! Worker process entry point: loads `worker.yml`, configures one
//! [`bubble_worker::ActionRunner`] per entry, registers with the Master,
//! and serves the Worker RPC surface used by both the Master and peer
//! Workers (disk handoff).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bubble_env::Any;
use bubble_proto::{HttpAsyncCall, MasterApi};
use bubble_worker::Worker;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "bubble-worker", about = "Bubble distributed job-execution worker")]
struct Args {
    /// Path to the worker configuration file (`action_name -> action_config`).
    #[arg(long, env = "BUBBLE_WORKER_CONFIG", default_value = "./worker.yml")]
    config: PathBuf,

    /// Address this worker's own RPC listener binds to.
    #[arg(long, env = "BUBBLE_WORKER_BIND", default_value = "0.0.0.0:9100")]
    bind: SocketAddr,

    /// Base URL the Master (and peer workers) use to call back into this
    /// one; defaults to `http://<bind>/`.
    #[arg(long, env = "BUBBLE_WORKER_CALLBACK_BASE")]
    callback_base: Option<String>,

    /// Base URL of the Master's RPC surface.
    #[arg(long, env = "BUBBLE_WORKER_MASTER_BASE")]
    master_base: reqwest::Url,

    /// Root directory in-flight runner working directories are created
    /// under.
    #[arg(long, env = "BUBBLE_WORKER_JOBS_ROOT", default_value = "./jobs")]
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
    let config = Any::from_yaml_bytes(&config_bytes).with_context(|| format!("parsing {}", args.config.display()))?;
    let actions = config.map().cloned().unwrap_or_default();

    let callback_base = args.callback_base.unwrap_or_else(|| format!("http://{}/", args.bind));
    let master: Arc<dyn MasterApi> = Arc::new(HttpAsyncCall::new(args.master_base));
    let cron_file = args.jobs_root.join(".worker.crons");
    let cron_factory: bubble_cron::JobFactory = {
        let jobs_root = args.jobs_root.clone();
        Arc::new(move || Box::new(bubble_worker::CleanJob::new(jobs_root.clone())) as Box<dyn bubble_cron::CronJob>)
    };
    let cron = bubble_cron::Cron::load(cron_factory, cron_file).await;
    cron.start_all().await;

    let id = bubble_env::next_id();
    let worker = Worker::new(id, callback_base, args.jobs_root.clone(), master, cron);

    for (name, conf) in actions {
        let Some(factory) = bubble_actions::create(&name) else {
            tracing::warn!(action = %name, "worker.yml names an unknown action kind, skipping");
            continue;
        };
        let raw_yaml = conf.to_yaml_bytes().with_context(|| format!("re-encoding config for action [{name}]"))?;
        worker
            .configure_action(name.clone(), factory, &raw_yaml)
            .with_context(|| format!("configuring action [{name}]"))?;
        tracing::info!(action = %name, "configured action");
    }

    worker.register().await.context("registering with master")?;
    worker.spawn_workload_broadcast();

    let router = bubble_proto::serve_worker(worker as Arc<dyn bubble_proto::WorkerApi>);
    let listener = tokio::net::TcpListener::bind(args.bind).await.with_context(|| format!("binding {}", args.bind))?;
    tracing::info!(bind = %args.bind, "bubble-worker listening");

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await.context("serving")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(?err, "failed to install ctrl-c handler");
    }
    tracing::info!("shutdown signal received");
}

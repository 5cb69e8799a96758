use clap::Parser;
use tracing_subscriber::EnvFilter;

use outbox_egress_proxy::agent::AgentSupervisor;
use outbox_egress_proxy::cli::Cli;
use outbox_egress_proxy::config::AppConfig;

fn main() -> outbox_egress_proxy::AppResult<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        // SAFETY: single-threaded at this point, before the runtime starts.
        unsafe {
            std::env::set_var("OUTBOX_CONFIG_PATH", path);
        }
    }

    let mut cfg = AppConfig::load()?;
    if let Some(timeout_ms) = cli.shutdown_timeout_ms {
        cfg.agent.shutdown_timeout_ms = timeout_ms;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cfg.logging.level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(id = %cfg.id, env = %cfg.env, workers = cli.workers, "starting outbox egress proxy");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli.workers)
        .enable_all()
        .build()
        .map_err(|e| outbox_egress_proxy::AppError::Internal(format!("failed to build tokio runtime: {e}")))?;

    runtime.block_on(async move {
        let supervisor = AgentSupervisor::bootstrap(cfg).await?;
        supervisor.run().await
    })
}

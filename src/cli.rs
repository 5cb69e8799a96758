use std::path::PathBuf;

use clap::Parser;

/// Starts the egress proxy agent: the forwarder (C5) and WAL listener (C6),
/// wired by the config at `--config` (or `OUTBOX_CONFIG_PATH`, or
/// `src/config/app.toml`).
#[derive(Parser, Debug, Clone)]
#[command(name = "outbox-egress-proxy", about)]
pub struct Cli {
    /// Path to the TOML config file. Overrides `OUTBOX_CONFIG_PATH`.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Tokio worker threads.
    #[arg(long, default_value_t = default_workers())]
    pub workers: usize,

    /// Overrides `agent.shutdown_timeout_ms` from the config file.
    #[arg(long)]
    pub shutdown_timeout_ms: Option<u64>,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_well_formed() {
        Cli::command().debug_assert();
    }
}

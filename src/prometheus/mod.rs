pub mod config;
pub mod metrics;
pub mod server;

pub use config::PrometheusConfig;
pub use metrics::EgressMetrics;
pub use server::run_metrics_server;

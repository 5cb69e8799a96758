/// Where the `/metrics` HTTP endpoint binds. Kept separate from
/// [`crate::config::app::MetricsSettings`] so the server itself doesn't
/// depend on the top-level config tree — only on the handful of fields it
/// actually needs.
#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    pub bind_addr: String,
    pub port: u16,
    pub metrics_path: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: 9090,
            metrics_path: "/metrics".into(),
        }
    }
}

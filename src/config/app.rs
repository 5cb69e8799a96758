use std::{env, fs};

use serde::Deserialize;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub id: String,
    pub env: String,

    pub postgres: PostgresConfig,
    pub forwarder: ForwarderSettings,
    pub agent: AgentConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    /// Name of the environment variable holding the pooled DSN used by the
    /// outbox writer, the egress storage and the agent supervisor.
    pub connection_env: String,
    pub egress_table: String,
    pub egress_schema: String,
    pub pool_min: u32,
    pub pool_max: u32,
    pub connect_timeout_ms: u64,

    pub wal: WalSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalSettings {
    /// Name of the environment variable holding the raw replication DSN.
    /// Kept distinct from `postgres.connection_env` because it needs
    /// `replication=database` and usually a different role/grant.
    pub connection_env: String,
    pub slot_name: String,
    pub publication_name: String,
    pub create_publication: bool,
    pub standby_status_interval_ms: u64,
    pub receive_timeout_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub reconnect_backoff_max_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForwarderSettings {
    pub job_timeout_ms: u64,
    pub retry_total_retries: u32,
    pub retry_backoff_ms: u64,
    pub retry_backoff_max_ms: u64,
    pub retry_jitter: f64,
    pub queue_buffer: usize,
    pub codec: CodecChoice,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CodecChoice {
    Binary,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub shutdown_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub bind_addr: String,
    pub port: u16,
    pub metrics_path: String,
}

fn validate(cfg: &AppConfig) -> AppResult<()> {
    if cfg.id.trim().is_empty() {
        return Err(AppError::MissingConfig("id"));
    }

    if cfg.postgres.connection_env.trim().is_empty() {
        return Err(AppError::InvalidConfig(
            "postgres.connection_env must not be empty".into(),
        ));
    }
    if env::var(&cfg.postgres.connection_env).is_err() {
        return Err(AppError::InvalidConfig(format!(
            "environment variable '{}' is not set",
            cfg.postgres.connection_env
        )));
    }
    if cfg.postgres.egress_table.trim().is_empty() {
        return Err(AppError::InvalidConfig(
            "postgres.egress_table must not be empty".into(),
        ));
    }
    if cfg.postgres.pool_min == 0 || cfg.postgres.pool_min > cfg.postgres.pool_max {
        return Err(AppError::InvalidConfig(
            "postgres.pool_min must be >= 1 and <= pool_max".into(),
        ));
    }

    if cfg.postgres.wal.connection_env.trim().is_empty() {
        return Err(AppError::InvalidConfig(
            "postgres.wal.connection_env must not be empty".into(),
        ));
    }
    if env::var(&cfg.postgres.wal.connection_env).is_err() {
        return Err(AppError::InvalidConfig(format!(
            "environment variable '{}' is not set",
            cfg.postgres.wal.connection_env
        )));
    }
    if cfg.postgres.wal.slot_name.trim().is_empty() {
        return Err(AppError::InvalidConfig(
            "postgres.wal.slot_name must not be empty".into(),
        ));
    }

    if cfg.forwarder.retry_jitter < 0.0 || cfg.forwarder.retry_jitter > 1.0 {
        return Err(AppError::InvalidConfig(
            "forwarder.retry_jitter must be within [0.0, 1.0]".into(),
        ));
    }
    if cfg.forwarder.queue_buffer == 0 {
        return Err(AppError::InvalidConfig(
            "forwarder.queue_buffer must be > 0".into(),
        ));
    }

    if cfg.agent.shutdown_timeout_ms == 0 {
        return Err(AppError::InvalidConfig(
            "agent.shutdown_timeout_ms must be > 0".into(),
        ));
    }

    Ok(())
}

const APP_CONFIG_ENV: &str = "OUTBOX_CONFIG_PATH";
const APP_CONFIG_DEFAULT_PATH: &str = "src/config/app.toml";

impl AppConfig {
    pub fn load() -> AppResult<Self> {
        let path = env::var(APP_CONFIG_ENV).unwrap_or_else(|_| APP_CONFIG_DEFAULT_PATH.to_string());
        let raw = fs::read_to_string(&path)?;
        let cfg: Self = toml::from_str(&raw)?;
        validate(&cfg)?;
        Ok(cfg)
    }

    pub fn postgres_dsn(&self) -> AppResult<String> {
        env::var(&self.postgres.connection_env).map_err(|_| {
            AppError::InvalidConfig(format!(
                "environment variable '{}' is not set",
                self.postgres.connection_env
            ))
        })
    }

    pub fn wal_dsn(&self) -> AppResult<String> {
        env::var(&self.postgres.wal.connection_env).map_err(|_| {
            AppError::InvalidConfig(format!(
                "environment variable '{}' is not set",
                self.postgres.wal.connection_env
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
            id = "egress-proxy-1"
            env = "test"

            [postgres]
            connection_env = "OUTBOX_TEST_DSN"
            egress_table = "egress_outbox"
            egress_schema = "public"
            pool_min = 1
            pool_max = 5
            connect_timeout_ms = 3000

            [postgres.wal]
            connection_env = "OUTBOX_TEST_WAL_DSN"
            slot_name = "egress_outbox_slot"
            publication_name = "egress_outbox_pub"
            create_publication = true
            standby_status_interval_ms = 10000
            receive_timeout_ms = 30000
            reconnect_backoff_ms = 1000
            reconnect_backoff_max_ms = 30000

            [forwarder]
            job_timeout_ms = 60000
            retry_total_retries = 3
            retry_backoff_ms = 5000
            retry_backoff_max_ms = 10000
            retry_jitter = 0.75
            queue_buffer = 256
            codec = "binary"

            [agent]
            shutdown_timeout_ms = 15000

            [logging]
            level = "info"

            [metrics]
            enabled = true
            bind_addr = "0.0.0.0"
            port = 9090
            metrics_path = "/metrics"
        "#
    }

    #[test]
    fn parses_and_validates_a_well_formed_config() {
        unsafe {
            env::set_var("OUTBOX_TEST_DSN", "postgres://localhost/test");
            env::set_var("OUTBOX_TEST_WAL_DSN", "postgres://localhost/test?replication=database");
        }

        let cfg: AppConfig = toml::from_str(sample_toml()).unwrap();
        assert!(validate(&cfg).is_ok());
        assert_eq!(cfg.postgres.egress_table, "egress_outbox");
        assert_eq!(cfg.forwarder.codec, CodecChoice::Binary);
    }

    #[test]
    fn rejects_jitter_outside_unit_interval() {
        unsafe {
            env::set_var("OUTBOX_TEST_DSN", "postgres://localhost/test");
            env::set_var("OUTBOX_TEST_WAL_DSN", "postgres://localhost/test?replication=database");
        }

        let mut cfg: AppConfig = toml::from_str(sample_toml()).unwrap();
        cfg.forwarder.retry_jitter = 1.5;
        assert!(validate(&cfg).is_err());
    }
}

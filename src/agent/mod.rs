use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;

use crate::codec::{BinaryCodec, Codec, JsonCodec, TransportMessageBatch};
use crate::config::{AppConfig, CodecChoice};
use crate::error::{AppError, AppResult};
use crate::forwarder::{BrokerWriter, Forwarder, ForwarderConfig, RetryPolicy};
use crate::outbox::{EgressStorage, EgressStorageConfig};
use crate::prometheus::{EgressMetrics, PrometheusConfig};
use crate::wal::{Wal, WalConfig};

/// Stand-in for a real broker client (Kafka, NATS, ...), which is out of
/// scope here. Logs every batch it would have published, so a deployment can
/// still observe forwarding activity before a real [`BrokerWriter`] is wired
/// in.
struct LoggingBrokerWriter;

#[async_trait]
impl BrokerWriter for LoggingBrokerWriter {
    async fn write(&self, batch: &TransportMessageBatch) -> AppResult<()> {
        tracing::info!(
            message_count = batch.messages.len(),
            "forwarding batch (no broker client configured, logging instead)"
        );
        Ok(())
    }
}

/// Owns every long-running piece of one agent process: the forwarder's bus
/// loop, the WAL listener's receive loop, and (optionally) the metrics HTTP
/// server. Never a package-level singleton; `main` constructs exactly one of
/// these per process.
pub struct AgentSupervisor {
    forwarder: Arc<Forwarder>,
    wal: Arc<Wal>,
    metrics: Option<Arc<EgressMetrics>>,
    metrics_cfg: Option<PrometheusConfig>,
    shutdown_timeout: Duration,
}

impl AgentSupervisor {
    /// Builds every component from a loaded, already-validated [`AppConfig`]:
    /// the Postgres pool, egress storage, codec, forwarder and WAL listener.
    /// Connects to Postgres but does not start the replication stream or the
    /// bus dispatch loop; call [`AgentSupervisor::run`] for that.
    pub async fn bootstrap(cfg: AppConfig) -> AppResult<Self> {
        let dsn = cfg.postgres_dsn()?;
        let wal_dsn = cfg.wal_dsn()?;

        let pool = PgPoolOptions::new()
            .min_connections(cfg.postgres.pool_min)
            .max_connections(cfg.postgres.pool_max)
            .acquire_timeout(Duration::from_millis(cfg.postgres.connect_timeout_ms))
            .connect(&dsn)
            .await?;

        let codec: Arc<dyn Codec> = match cfg.forwarder.codec {
            CodecChoice::Binary => Arc::new(BinaryCodec::new()),
            CodecChoice::Json => Arc::new(JsonCodec::new()),
        };

        let metrics = if cfg.metrics.enabled {
            Some(Arc::new(EgressMetrics::new()?))
        } else {
            None
        };

        let storage = EgressStorage::new(pool, EgressStorageConfig::new(cfg.postgres.egress_table.clone()));

        let mut forwarder_cfg = ForwarderConfig::new(storage, Arc::new(LoggingBrokerWriter), codec.clone());
        forwarder_cfg.job_timeout = Duration::from_millis(cfg.forwarder.job_timeout_ms);
        forwarder_cfg.retry = RetryPolicy {
            max_retries: cfg.forwarder.retry_total_retries,
            base_backoff: Duration::from_millis(cfg.forwarder.retry_backoff_ms),
            max_backoff: Duration::from_millis(cfg.forwarder.retry_backoff_max_ms),
            jitter: cfg.forwarder.retry_jitter,
        };
        forwarder_cfg.bus.queue_buffer = cfg.forwarder.queue_buffer;
        if let Some(metrics) = &metrics {
            forwarder_cfg = forwarder_cfg.with_metrics(metrics.clone());
        }

        let forwarder = Forwarder::new(forwarder_cfg);

        let wal_cfg = WalConfig {
            connection_string: wal_dsn,
            slot_name: cfg.postgres.wal.slot_name.clone(),
            publication_name: cfg.postgres.wal.publication_name.clone(),
            egress_table: cfg.postgres.egress_table.clone(),
            egress_schema: cfg.postgres.egress_schema.clone(),
            create_publication: cfg.postgres.wal.create_publication,
            standby_status_interval: Duration::from_millis(cfg.postgres.wal.standby_status_interval_ms),
            receive_timeout: Duration::from_millis(cfg.postgres.wal.receive_timeout_ms),
            reconnect_backoff: Duration::from_millis(cfg.postgres.wal.reconnect_backoff_ms),
            reconnect_backoff_max: Duration::from_millis(cfg.postgres.wal.reconnect_backoff_max_ms),
            ..WalConfig::default()
        };

        let wal = match &metrics {
            Some(metrics) => Wal::with_metrics(wal_cfg, forwarder.clone(), codec.clone(), metrics.clone()),
            None => Wal::new(wal_cfg, forwarder.clone(), codec.clone()),
        };

        let metrics_cfg = cfg.metrics.enabled.then(|| PrometheusConfig {
            bind_addr: cfg.metrics.bind_addr.clone(),
            port: cfg.metrics.port,
            metrics_path: cfg.metrics.metrics_path.clone(),
        });

        Ok(Self {
            forwarder,
            wal,
            metrics,
            metrics_cfg,
            shutdown_timeout: Duration::from_millis(cfg.agent.shutdown_timeout_ms),
        })
    }

    /// Runs the forwarder, the WAL listener and (if enabled) the metrics
    /// server concurrently until a shutdown signal (SIGINT/SIGTERM) arrives
    /// or either supervised task exits on its own, then drains the forwarder
    /// and listener bounded by `agent.shutdown_timeout_ms`.
    pub async fn run(self) -> AppResult<()> {
        let mut forwarder_task = tokio::spawn(self.forwarder.clone().run());
        let mut wal_task = tokio::spawn(self.wal.clone().start());

        let metrics_task = match (&self.metrics, &self.metrics_cfg) {
            (Some(metrics), Some(metrics_cfg)) => {
                let metrics = metrics.clone();
                let metrics_cfg = metrics_cfg.clone();
                Some(tokio::spawn(async move {
                    crate::prometheus::run_metrics_server(metrics_cfg, move || metrics.gather()).await
                }))
            }
            _ => None,
        };

        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .map_err(|e| AppError::Internal(format!("failed to install SIGTERM handler: {e}")))?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
            result = &mut forwarder_task => {
                tracing::error!(?result, "forwarder task exited before shutdown was requested");
            }
            result = &mut wal_task => {
                tracing::error!(?result, "WAL listener task exited before shutdown was requested");
            }
        }

        self.forwarder.shutdown().await;
        self.wal.shutdown();

        let drain = async {
            let _ = forwarder_task.await;
            let _ = wal_task.await;
        };

        if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
            tracing::warn!(
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "shutdown timed out waiting for the forwarder and WAL listener to drain"
            );
        }

        if let Some(metrics_task) = metrics_task {
            metrics_task.abort();
        }

        Ok(())
    }
}

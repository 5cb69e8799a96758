use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::bus::{BusHandler, BusMessage, JobBus, JobBusConfig};
use crate::codec::{Codec, TransportMessageBatch};
use crate::error::{AppError, AppResult};
use crate::outbox::EgressStorage;
use crate::prometheus::EgressMetrics;

use super::middleware::{log_on_error, with_retry};
use super::retry::RetryPolicy;

const FORWARDER_STREAM: &str = "forwarder-worker";

/// Sends an already-decoded batch out to the broker. Broker client
/// internals are out of scope here (see `spec.md`'s Non-goals); this trait
/// is the seam a real Kafka/NATS/etc. client would implement.
#[async_trait]
pub trait BrokerWriter: Send + Sync {
    async fn write(&self, batch: &TransportMessageBatch) -> AppResult<()>;
}

/// Closed, tagged job shape carried over the bus instead of a heterogeneous
/// payload plus a runtime cast: either "go fetch and forward this stored
/// batch" or "forward this batch directly, it was handed to us already
/// materialized" (the `ForwardBatch` path, for callers that have the batch
/// in hand and don't need a storage round trip).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardJob {
    RawId(String),
    Materialized { batch_id: String, batch: TransportMessageBatch },
}

impl ForwardJob {
    fn encode(&self, codec: &dyn Codec) -> AppResult<Vec<u8>> {
        match self {
            ForwardJob::RawId(id) => {
                let mut out = vec![0u8];
                out.extend_from_slice(id.as_bytes());
                Ok(out)
            }
            ForwardJob::Materialized { batch_id, batch } => {
                let mut out = vec![1u8];
                out.extend_from_slice(&(batch_id.len() as u32).to_be_bytes());
                out.extend_from_slice(batch_id.as_bytes());
                out.extend_from_slice(&codec.encode(batch)?);
                Ok(out)
            }
        }
    }

    fn decode(bytes: &[u8], codec: &dyn Codec) -> AppResult<Self> {
        let (tag, rest) = bytes
            .split_first()
            .ok_or_else(|| AppError::Codec("empty forward job frame".into()))?;

        match tag {
            0 => {
                let id = String::from_utf8(rest.to_vec())
                    .map_err(|e| AppError::Codec(format!("invalid batch id: {e}")))?;
                Ok(ForwardJob::RawId(id))
            }
            1 => {
                if rest.len() < 4 {
                    return Err(AppError::Codec("truncated materialized job frame".into()));
                }
                let (len_bytes, rest) = rest.split_at(4);
                let id_len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
                if rest.len() < id_len {
                    return Err(AppError::Codec("truncated materialized job batch id".into()));
                }
                let (id_bytes, batch_bytes) = rest.split_at(id_len);
                let batch_id = String::from_utf8(id_bytes.to_vec())
                    .map_err(|e| AppError::Codec(format!("invalid batch id: {e}")))?;
                Ok(ForwardJob::Materialized {
                    batch_id,
                    batch: codec.decode(batch_bytes)?,
                })
            }
            other => Err(AppError::Codec(format!("unknown forward job tag: {other}"))),
        }
    }
}

#[derive(Clone)]
pub struct ForwarderConfig {
    pub storage: EgressStorage,
    pub writer: Arc<dyn BrokerWriter>,
    pub codec: Arc<dyn Codec>,
    pub job_timeout: Duration,
    pub retry: RetryPolicy,
    pub bus: JobBusConfig,
    pub metrics: Option<Arc<EgressMetrics>>,
}

impl ForwarderConfig {
    pub fn new(storage: EgressStorage, writer: Arc<dyn BrokerWriter>, codec: Arc<dyn Codec>) -> Self {
        Self {
            storage,
            writer,
            codec,
            job_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            bus: JobBusConfig::default(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<EgressMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

struct ForwardJobHandler {
    storage: EgressStorage,
    writer: Arc<dyn BrokerWriter>,
    codec: Arc<dyn Codec>,
    retry: RetryPolicy,
    job_timeout: Duration,
    metrics: Option<Arc<EgressMetrics>>,
}

impl ForwardJobHandler {
    /// One forward attempt: fetch-if-needed, decode, publish, commit. Bounded
    /// by `job_timeout` (spec.md §4.4: "ForwardJobTimeout ... upper bound per
    /// attempt"), so a single slow broker call can't stall retries forever.
    async fn attempt(&self, job: &ForwardJob) -> AppResult<()> {
        let work = async {
            match job {
                ForwardJob::RawId(batch_id) => self.send_batch(batch_id).await,
                ForwardJob::Materialized { batch_id, batch } => {
                    self.writer.write(batch).await?;
                    self.storage.commit(batch_id).await?;
                    Ok(())
                }
            }
        };

        match tokio::time::timeout(self.job_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(AppError::JobTimeout),
        }
    }

    async fn send_batch(&self, batch_id: &str) -> AppResult<()> {
        let row = match self.storage.get_batch(batch_id).await {
            Ok(row) => row,
            Err(AppError::BatchNotFound(_)) => {
                // Already committed by a previous delivery; nothing to do.
                tracing::debug!(batch_id, "batch already committed, skipping");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let batch = self
            .codec
            .decode(&row.raw_data)
            .map_err(|err| err.unrecoverable())?;

        self.writer.write(&batch).await?;
        self.storage.commit(batch_id).await?;

        Ok(())
    }
}

#[async_trait]
impl BusHandler for ForwardJobHandler {
    async fn handle(&self, msg: BusMessage) -> AppResult<()> {
        let job = ForwardJob::decode(&msg.data, self.codec.as_ref()).map_err(|err| err.unrecoverable())?;

        let result = with_retry(&self.retry, || self.attempt(&job)).await;

        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(()) => metrics.batches_forwarded_total.inc(),
                Err(_) => metrics.batches_failed_total.inc(),
            }
        }

        let label = match &job {
            ForwardJob::RawId(id) => id.clone(),
            ForwardJob::Materialized { batch_id, .. } => batch_id.clone(),
        };
        log_on_error(&label, &result);

        result
    }
}

/// Wraps an internal [`JobBus`] to fan forward jobs out to a single worker
/// stream. Never a package-level singleton; every agent supervisor owns its
/// own `Forwarder`.
pub struct Forwarder {
    bus: Arc<JobBus>,
    codec: Arc<dyn Codec>,
}

impl Forwarder {
    pub fn new(cfg: ForwarderConfig) -> Arc<Self> {
        let bus = JobBus::new(cfg.bus.clone());
        let codec = cfg.codec.clone();

        let handler = Arc::new(ForwardJobHandler {
            storage: cfg.storage,
            writer: cfg.writer,
            codec: cfg.codec,
            retry: cfg.retry,
            job_timeout: cfg.job_timeout,
            metrics: cfg.metrics,
        });

        bus.subscribe(FORWARDER_STREAM, handler);

        Arc::new(Self { bus, codec })
    }

    /// Runs the internal bus's dispatch loop. Should be spawned as a task
    /// by the agent supervisor and run until [`Forwarder::shutdown`] drains it.
    pub async fn run(self: Arc<Self>) -> AppResult<()> {
        self.bus.clone().start().await
    }

    pub async fn shutdown(&self) {
        self.bus.shutdown().await;
    }

    /// Schedules forwarding of a previously-written batch by id. Spec.md
    /// §4.4/§8: an empty id is a boundary error, not a job worth enqueuing.
    pub async fn forward(&self, batch_id: impl Into<String>) -> AppResult<()> {
        let batch_id = batch_id.into();
        if batch_id.is_empty() {
            return Err(AppError::EmptyMessage);
        }
        let job = ForwardJob::RawId(batch_id);
        let data = job.encode(self.codec.as_ref())?;
        self.bus.publish(BusMessage::new(FORWARDER_STREAM, data)).await
    }

    /// Schedules forwarding of a batch that's already in hand, skipping the
    /// egress-table read (but not its commit — `batch_id` still identifies
    /// the row to delete on success). See `spec.md`'s Open Question on
    /// `Forward`/`ForwardBatch` concurrency policy: both share the same
    /// internal stream and worker pool, so they are subject to the same
    /// ordering and concurrency limits.
    pub async fn forward_batch(
        &self,
        batch_id: impl Into<String>,
        batch: TransportMessageBatch,
    ) -> AppResult<()> {
        let batch_id = batch_id.into();
        if batch_id.is_empty() {
            return Err(AppError::EmptyMessage);
        }
        let job = ForwardJob::Materialized { batch_id, batch };
        let data = job.encode(self.codec.as_ref())?;
        self.bus.publish(BusMessage::new(FORWARDER_STREAM, data)).await
    }
}

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::error::AppResult;

/// Ambient observability for the egress proxy agent. `spec.md` lists
/// "configuration loading, logging setup" as external collaborators but
/// never excludes metrics outright; the Go source's `db/metrics.go` and
/// `redis/metrics.go` equivalents (teacher's original domain) are replaced
/// here with the handful of counters that matter for C5/C6: how many
/// batches made it out, how many didn't, and how many WAL inserts the
/// listener has observed.
#[derive(Clone)]
pub struct EgressMetrics {
    registry: Registry,
    pub batches_forwarded_total: IntCounter,
    pub batches_failed_total: IntCounter,
    pub wal_inserts_observed_total: IntCounter,
    pub wal_total_reads: IntGauge,
}

impl EgressMetrics {
    pub fn new() -> AppResult<Self> {
        let registry = Registry::new();

        let batches_forwarded_total = IntCounter::new(
            "outbox_batches_forwarded_total",
            "Egress batches successfully published to the broker and committed from storage",
        )?;
        let batches_failed_total = IntCounter::new(
            "outbox_batches_failed_total",
            "Egress batches that exhausted retries or hit an unrecoverable error",
        )?;
        let wal_inserts_observed_total = IntCounter::new(
            "outbox_wal_inserts_observed_total",
            "Egress-table INSERT events observed on the replication stream",
        )?;
        let wal_total_reads = IntGauge::new(
            "outbox_wal_total_reads",
            "Total CopyData messages received on the replication stream",
        )?;

        registry.register(Box::new(batches_forwarded_total.clone()))?;
        registry.register(Box::new(batches_failed_total.clone()))?;
        registry.register(Box::new(wal_inserts_observed_total.clone()))?;
        registry.register(Box::new(wal_total_reads.clone()))?;

        Ok(Self {
            registry,
            batches_forwarded_total,
            batches_failed_total,
            wal_inserts_observed_total,
            wal_total_reads,
        })
    }

    /// Renders the registry in Prometheus's text exposition format.
    pub fn gather(&self) -> AppResult<String> {
        let families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new().encode(&families, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_renders_registered_counters() {
        let metrics = EgressMetrics::new().unwrap();
        metrics.batches_forwarded_total.inc();

        let text = metrics.gather().unwrap();
        assert!(text.contains("outbox_batches_forwarded_total"));
    }
}

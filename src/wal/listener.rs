use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::time::MissedTickBehavior;
use tokio_postgres::{Client, Config, NoTls};
use tokio_util::sync::CancellationToken;

use crate::codec::Codec;
use crate::error::{AppError, AppResult};
use crate::forwarder::Forwarder;
use crate::prometheus::EgressMetrics;

use super::protocol::{
    decode_column, encode_standby_status_update, format_lsn, parse_copy_data, parse_lsn,
    parse_pgoutput_message, ColumnInfo, ColumnValue, Lsn, PgOutputMessage, ReplicationMessage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalState {
    Disconnected,
    Connected,
    PublicationReady,
    SlotReady,
    Running,
    ShuttingDown,
    Terminated,
}

impl From<u8> for WalState {
    fn from(v: u8) -> Self {
        match v {
            0 => WalState::Disconnected,
            1 => WalState::Connected,
            2 => WalState::PublicationReady,
            3 => WalState::SlotReady,
            4 => WalState::Running,
            5 => WalState::ShuttingDown,
            _ => WalState::Terminated,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalConfig {
    pub connection_string: String,
    pub slot_name: String,
    pub publication_name: String,
    pub egress_table: String,
    pub egress_schema: String,
    pub batch_id_column: String,
    pub raw_data_column: String,
    /// Whether to `CREATE PUBLICATION` for `egress_table` if it doesn't
    /// exist yet. Idempotent: a `duplicate_object` error is swallowed.
    pub create_publication: bool,
    pub standby_status_interval: Duration,
    pub receive_timeout: Duration,
    pub reconnect_backoff: Duration,
    pub reconnect_backoff_max: Duration,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            slot_name: "streams_egress_proxy_worker".into(),
            publication_name: "streams_egress_proxy".into(),
            egress_table: "streams_egress".into(),
            egress_schema: "public".into(),
            batch_id_column: "batch_id".into(),
            raw_data_column: "raw_data".into(),
            create_publication: true,
            standby_status_interval: Duration::from_secs(10),
            receive_timeout: Duration::from_secs(30),
            reconnect_backoff: Duration::from_secs(1),
            reconnect_backoff_max: Duration::from_secs(30),
        }
    }
}

/// Tails the `egress_table`'s logical replication stream and notifies the
/// forwarder of every inserted batch id. State machine mirrors the source's
/// `WAL` struct: connect, ensure the publication exists, fetch (or create)
/// the slot's confirmed position, then run the receive loop until shutdown
/// or a fatal error.
pub struct Wal {
    cfg: WalConfig,
    forwarder: Arc<Forwarder>,
    codec: Arc<dyn Codec>,
    metrics: Option<Arc<EgressMetrics>>,
    state: AtomicU8,
    total_reads: AtomicU64,
    cancel: CancellationToken,
}

impl Wal {
    pub fn new(cfg: WalConfig, forwarder: Arc<Forwarder>, codec: Arc<dyn Codec>) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            forwarder,
            codec,
            metrics: None,
            state: AtomicU8::new(WalState::Disconnected as u8),
            total_reads: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_metrics(cfg: WalConfig, forwarder: Arc<Forwarder>, codec: Arc<dyn Codec>, metrics: Arc<EgressMetrics>) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            forwarder,
            codec,
            metrics: Some(metrics),
            state: AtomicU8::new(WalState::Disconnected as u8),
            total_reads: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> WalState {
        WalState::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: WalState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn total_reads(&self) -> u64 {
        self.total_reads.load(Ordering::SeqCst)
    }

    /// Reconnect loop: keeps retrying `run_once` with capped exponential
    /// backoff on transient failures. Returns only on a deliberate shutdown
    /// or a fatal (non-retryable) error.
    pub async fn start(self: Arc<Self>) -> AppResult<()> {
        let mut backoff = self.cfg.reconnect_backoff;

        loop {
            if self.cancel.is_cancelled() {
                self.set_state(WalState::Terminated);
                return Ok(());
            }

            match self.run_once().await {
                Ok(()) => {
                    self.set_state(WalState::Terminated);
                    return Ok(());
                }
                Err(err) if is_fatal(&err) => {
                    tracing::error!(error = %err, "WAL listener hit a fatal error");
                    self.set_state(WalState::Terminated);
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "WAL listener disconnected, retrying"
                    );
                    self.set_state(WalState::Disconnected);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.cfg.reconnect_backoff_max);
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.set_state(WalState::ShuttingDown);
        self.cancel.cancel();
    }

    async fn run_once(&self) -> AppResult<()> {
        let config: Config = self
            .cfg
            .connection_string
            .parse()
            .map_err(|e| AppError::InvalidConfig(format!("invalid postgres connection string: {e}")))?;

        let (client, connection) = config.connect(NoTls).await?;
        let connection_handle = tokio::spawn(connection);
        self.set_state(WalState::Connected);

        if self.cfg.create_publication {
            self.ensure_publication(&client).await?;
        }
        self.set_state(WalState::PublicationReady);

        let start_lsn = self.fetch_or_create_slot(&client).await?;
        self.set_state(WalState::SlotReady);

        let result = self.listen_logs(&client, start_lsn).await;

        connection_handle.abort();
        result
    }

    async fn ensure_publication(&self, client: &Client) -> AppResult<()> {
        let sql = format!(
            "CREATE PUBLICATION {} FOR TABLE {}.{}",
            self.cfg.publication_name, self.cfg.egress_schema, self.cfg.egress_table
        );

        match client.simple_query(&sql).await {
            Ok(_) => Ok(()),
            Err(err) if err.code().map(|c| c.code()) == Some("42710") => {
                // duplicate_object: publication already exists.
                Ok(())
            }
            Err(err) => Err(AppError::Replication(err)),
        }
    }

    async fn fetch_or_create_slot(&self, client: &Client) -> AppResult<Lsn> {
        let rows = client
            .simple_query(&format!(
                "SELECT confirmed_flush_lsn FROM pg_replication_slots WHERE slot_name = '{}'",
                self.cfg.slot_name
            ))
            .await?;

        for item in &rows {
            if let tokio_postgres::SimpleQueryMessage::Row(row) = item {
                if let Some(lsn_text) = row.get(0) {
                    return parse_lsn(lsn_text);
                }
            }
        }

        let create_sql = format!(
            "CREATE_REPLICATION_SLOT {} LOGICAL pgoutput",
            self.cfg.slot_name
        );
        let rows = client.simple_query(&create_sql).await?;
        for item in &rows {
            if let tokio_postgres::SimpleQueryMessage::Row(row) = item {
                if let Some(lsn_text) = row.get("consistent_point") {
                    return parse_lsn(lsn_text);
                }
            }
        }

        Err(AppError::Protocol(format!(
            "CREATE_REPLICATION_SLOT for '{}' returned no consistent_point",
            self.cfg.slot_name
        )))
    }

    async fn listen_logs(&self, client: &Client, start_lsn: Lsn) -> AppResult<()> {
        self.set_state(WalState::Running);

        let query = format!(
            "START_REPLICATION SLOT {} LOGICAL {} (proto_version '1', publication_names '{}')",
            self.cfg.slot_name,
            format_lsn(start_lsn),
            self.cfg.publication_name
        );

        let duplex_stream = client.copy_both_simple::<Bytes>(&query).await?;
        tokio::pin!(duplex_stream);

        let mut relation_columns: std::collections::HashMap<u32, Vec<ColumnInfo>> =
            std::collections::HashMap::new();
        let mut last_lsn: Lsn = start_lsn;

        let mut status_ticker = tokio::time::interval(self.cfg.standby_status_interval);
        status_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = status_ticker.tick() => {
                    send_standby_status(duplex_stream.as_mut(), last_lsn).await?;
                }
                chunk = tokio::time::timeout(self.cfg.receive_timeout, duplex_stream.next()) => {
                    let chunk = match chunk {
                        Ok(Some(Ok(bytes))) => bytes,
                        Ok(Some(Err(err))) => return Err(AppError::Replication(err)),
                        Ok(None) => return Ok(()), // stream closed cleanly
                        Err(_) => continue, // receive timeout, loop back and send status on next tick
                    };

                    let total = self.total_reads.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.wal_total_reads.set(total as i64);
                    }

                    match parse_copy_data(&chunk)? {
                        ReplicationMessage::PrimaryKeepalive { end_lsn, reply_requested } => {
                            last_lsn = last_lsn.max(end_lsn);
                            if reply_requested {
                                send_standby_status(duplex_stream.as_mut(), last_lsn).await?;
                            }
                        }
                        ReplicationMessage::XLogData { wal_start, data, .. } => {
                            last_lsn = last_lsn.max(wal_start + data.len() as u64);
                            self.handle_pgoutput(&data, &mut relation_columns).await?;
                        }
                    }
                }
            }
        }
    }

    async fn handle_pgoutput(
        &self,
        data: &[u8],
        relation_columns: &mut std::collections::HashMap<u32, Vec<ColumnInfo>>,
    ) -> AppResult<()> {
        match parse_pgoutput_message(data)? {
            PgOutputMessage::Relation {
                id,
                name,
                columns,
                ..
            } => {
                if name == self.cfg.egress_table {
                    relation_columns.insert(id, columns);
                }
                Ok(())
            }
            PgOutputMessage::Insert {
                relation_id,
                values,
            } => {
                let Some(columns) = relation_columns.get(&relation_id) else {
                    return Ok(()); // insert into a table we don't track
                };

                let Some(batch_id_idx) = columns.iter().position(|c| c.name == self.cfg.batch_id_column) else {
                    return Ok(());
                };
                let Some(raw_data_idx) = columns.iter().position(|c| c.name == self.cfg.raw_data_column) else {
                    return Ok(());
                };

                let batch_id = match decode_tuple_value(columns, &values, batch_id_idx)? {
                    Some(ColumnValue::Text(text)) => text,
                    Some(other) => {
                        return Err(AppError::Protocol(format!(
                            "egress table's batch_id column decoded as {other:?}, expected text"
                        )))
                    }
                    None => return Ok(()), // null/unchanged-TOAST batch id: nothing to forward
                };

                let raw_data = match decode_tuple_value(columns, &values, raw_data_idx)? {
                    Some(ColumnValue::Bytes(bytes)) => bytes,
                    Some(other) => {
                        return Err(AppError::Protocol(format!(
                            "egress table's raw_data column decoded as {other:?}, expected bytea"
                        )))
                    }
                    None => return Ok(()), // unchanged TOAST column we can't act on
                };

                tracing::debug!(batch_id = %batch_id, "observed egress insert via WAL");
                if let Some(metrics) = &self.metrics {
                    metrics.wal_inserts_observed_total.inc();
                }

                let batch = self
                    .codec
                    .decode(&raw_data)
                    .map_err(|err| err.unrecoverable())?;
                self.forwarder.forward_batch(batch_id, batch).await
            }
            _ => Ok(()),
        }
    }
}

/// Decodes one tuple column by looking up its type OID in the relation's
/// column schema. `None` covers both SQL NULL and an unchanged-TOAST column
/// (`u`), neither of which carries a value to act on.
fn decode_tuple_value(
    columns: &[ColumnInfo],
    values: &[Option<Vec<u8>>],
    idx: usize,
) -> AppResult<Option<ColumnValue>> {
    match values.get(idx) {
        Some(Some(raw)) => decode_column(columns[idx].type_oid, raw).map(Some),
        _ => Ok(None),
    }
}

async fn send_standby_status(
    mut stream: std::pin::Pin<&mut tokio_postgres::CopyBothDuplex<Bytes>>,
    lsn: Lsn,
) -> AppResult<()> {
    let msg = encode_standby_status_update(lsn, lsn, lsn);
    stream
        .send(Bytes::from(msg))
        .await
        .map_err(AppError::Replication)
}

/// The server's `ErrorResponse` is fatal (`spec.md` §4.5 step 3): the
/// replication stream is in a state that could otherwise loop indefinitely
/// on receive. A plain connection/IO failure (no `DbError`) is transient and
/// left to the reconnect-backoff loop in `start`.
fn is_fatal(err: &AppError) -> bool {
    match err {
        AppError::InvalidConfig(_) => true,
        AppError::Replication(e) => e.as_db_error().is_some(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_table_and_column_names() {
        let cfg = WalConfig::default();
        assert_eq!(cfg.egress_table, "streams_egress");
        assert_eq!(cfg.batch_id_column, "batch_id");
        assert_eq!(cfg.raw_data_column, "raw_data");
    }

    #[test]
    fn decode_tuple_value_resolves_by_column_oid() {
        let columns = vec![
            ColumnInfo {
                name: "batch_id".into(),
                type_oid: 25, // text
            },
            ColumnInfo {
                name: "raw_data".into(),
                type_oid: 17, // bytea
            },
            ColumnInfo {
                name: "message_count".into(),
                type_oid: 23, // int4
            },
        ];
        let values = vec![
            Some(b"batch-1".to_vec()),
            Some(b"\\x0102".to_vec()),
            None, // unchanged TOAST / null
        ];

        assert_eq!(
            decode_tuple_value(&columns, &values, 0).unwrap(),
            Some(ColumnValue::Text("batch-1".into()))
        );
        assert_eq!(
            decode_tuple_value(&columns, &values, 1).unwrap(),
            Some(ColumnValue::Bytes(vec![0x01, 0x02]))
        );
        assert_eq!(decode_tuple_value(&columns, &values, 2).unwrap(), None);
    }

    #[test]
    fn wal_state_round_trips_through_u8() {
        for state in [
            WalState::Disconnected,
            WalState::Connected,
            WalState::PublicationReady,
            WalState::SlotReady,
            WalState::Running,
            WalState::ShuttingDown,
            WalState::Terminated,
        ] {
            assert_eq!(WalState::from(state as u8), state);
        }
    }
}

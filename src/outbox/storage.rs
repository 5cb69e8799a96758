use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::message::EgressRow;

#[derive(Clone)]
pub struct EgressStorageConfig {
    pub egress_table: String,
}

impl EgressStorageConfig {
    pub fn new(egress_table: impl Into<String>) -> Self {
        Self {
            egress_table: egress_table.into(),
        }
    }
}

/// Reads and retires egress rows. Owned by the forwarder; the outbox writer
/// never calls it directly.
#[derive(Clone)]
pub struct EgressStorage {
    pool: PgPool,
    cfg: EgressStorageConfig,
}

impl EgressStorage {
    pub fn new(pool: PgPool, cfg: EgressStorageConfig) -> Self {
        Self { pool, cfg }
    }

    /// Fetches a batch by id. Returns `AppError::BatchNotFound` if the row is
    /// gone, which happens whenever a previous attempt already committed it.
    pub async fn get_batch(&self, batch_id: &str) -> AppResult<EgressRow> {
        let sql = format!(
            "SELECT batch_id, message_count, raw_data, insert_time FROM {} WHERE batch_id = $1",
            self.cfg.egress_table
        );

        let row: Option<(String, i32, Vec<u8>, DateTime<Utc>)> = sqlx::query_as(&sql)
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await?;

        let (batch_id, message_count, raw_data, insert_time) =
            row.ok_or_else(|| AppError::BatchNotFound(batch_id.to_string()))?;

        Ok(EgressRow {
            batch_id,
            message_count,
            raw_data,
            insert_time,
        })
    }

    /// Deletes a batch's row. Idempotent: deleting an already-gone batch
    /// affects zero rows and is not an error, matching the source's
    /// `DELETE ... WHERE batch_id = $1` semantics.
    pub async fn commit(&self, batch_id: &str) -> AppResult<()> {
        let sql = format!("DELETE FROM {} WHERE batch_id = $1", self.cfg.egress_table);

        sqlx::query(&sql).bind(batch_id).execute(&self.pool).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_carries_table_name() {
        let cfg = EgressStorageConfig::new("egress_outbox");
        assert_eq!(cfg.egress_table, "egress_outbox");
    }
}

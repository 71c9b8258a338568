// Log repositories: four rolling windows (threat, URL, system, traffic),
// each bounded at 1000 rows per device. The trim runs inside the insert
// transaction so the cap holds even under a burst.

use tracing::debug;
use uuid::Uuid;

use crate::model::{LogKind, LogRow};
use crate::{Store, StoreError};

/// Rolling-window bound per (device, kind).
pub const LOG_WINDOW_ROWS: i64 = 1000;

impl Store {
    /// Insert a batch of log rows and trim the device's window back to
    /// [`LOG_WINDOW_ROWS`] in the same transaction.
    pub async fn insert_logs(
        &self,
        device_id: Uuid,
        kind: LogKind,
        batch: &[LogRow],
    ) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let table = kind.table();

        let mut tx = self.pool().begin().await?;
        for row in batch {
            let insert = format!(
                "INSERT INTO {table} (
                    time, device_id, severity, name, source_ip, dest_ip, app,
                    action, category, rule, url, description,
                    bytes_sent, bytes_received, details
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
            );
            sqlx::query(&insert)
                .bind(row.time)
                .bind(device_id)
                .bind(row.severity.as_deref())
                .bind(row.name.as_deref())
                .bind(row.source_ip.as_deref())
                .bind(row.dest_ip.as_deref())
                .bind(row.app.as_deref())
                .bind(row.action.as_deref())
                .bind(row.category.as_deref())
                .bind(row.rule.as_deref())
                .bind(row.url.as_deref())
                .bind(row.description.as_deref())
                .bind(row.bytes_sent)
                .bind(row.bytes_received)
                .bind(row.details.as_ref())
                .execute(&mut *tx)
                .await?;
        }

        let trim = format!(
            "DELETE FROM {table}
             WHERE device_id = $1 AND id NOT IN (
                 SELECT id FROM {table}
                 WHERE device_id = $1
                 ORDER BY time DESC
                 LIMIT $2
             )"
        );
        let trimmed = sqlx::query(&trim)
            .bind(device_id)
            .bind(LOG_WINDOW_ROWS)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        if trimmed > 0 {
            debug!(device = %device_id, kind = %kind, trimmed, "log window trimmed");
        }
        Ok(())
    }

    /// The newest `limit` rows for a device and kind.
    pub async fn recent_logs(
        &self,
        device_id: Uuid,
        kind: LogKind,
        limit: i64,
    ) -> Result<Vec<LogRow>, StoreError> {
        let query = format!(
            "SELECT time, device_id, severity, name, source_ip, dest_ip, app,
                    action, category, rule, url, description,
                    bytes_sent, bytes_received, details
             FROM {table}
             WHERE device_id = $1
             ORDER BY time DESC
             LIMIT $2",
            table = kind.table()
        );
        let rows = sqlx::query_as::<_, LogRow>(&query)
            .bind(device_id)
            .bind(limit)
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }

    /// Re-apply the window bound across every device present in a table.
    /// Run hourly by the retention job to catch drift (e.g. rows restored
    /// from a backup).
    pub async fn enforce_log_caps(&self, kind: LogKind) -> Result<u64, StoreError> {
        let table = kind.table();
        let stmt = format!(
            "DELETE FROM {table} t
             WHERE t.id NOT IN (
                 SELECT id FROM {table} inner_t
                 WHERE inner_t.device_id = t.device_id
                 ORDER BY inner_t.time DESC
                 LIMIT $1
             )"
        );
        let deleted = sqlx::query(&stmt)
            .bind(LOG_WINDOW_ROWS)
            .execute(self.pool())
            .await?
            .rows_affected();

        if deleted > 0 {
            debug!(kind = %kind, deleted, "log cap enforcement pruned rows");
        }
        Ok(deleted)
    }
}

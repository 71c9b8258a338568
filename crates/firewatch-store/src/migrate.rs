// One-shot migration of legacy random device ids to their deterministic
// form, across every table carrying a device_id, inside a single
// transaction. The caller backs up the registry files first; a failure at
// any phase rolls the database back untouched.

use std::collections::HashMap;

use sqlx::Row;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{Store, StoreError};

/// Tables rewritten by the migration, in dependency order: configuration
/// tables first, then the history that references them.
const DEVICE_ID_TABLES: &[&str] = &[
    "alert_configs",
    "alert_cooldowns",
    "maintenance_windows",
    "scheduled_scans",
    "scan_queue",
    "throughput_samples",
    "connected_devices",
    "threat_logs",
    "url_filtering_logs",
    "system_logs",
    "traffic_logs",
    "application_samples",
    "alert_history",
    "scan_results",
    "scan_change_events",
];

/// Outcome of a migration run.
#[derive(Debug, Default)]
pub struct MigrationStats {
    pub mappings_applied: usize,
    pub rows_updated: u64,
    pub rows_per_table: HashMap<String, u64>,
}

impl Store {
    /// Rewrite `old -> new` device ids across every table. All-or-nothing:
    /// the transaction commits only after verification shows no old id
    /// remains.
    pub async fn migrate_device_ids(
        &self,
        mapping: &HashMap<Uuid, Uuid>,
    ) -> Result<MigrationStats, StoreError> {
        let mut stats = MigrationStats {
            mappings_applied: mapping.len(),
            ..MigrationStats::default()
        };
        if mapping.is_empty() {
            info!("no device ids to migrate");
            return Ok(stats);
        }

        let mut tx = self.pool().begin().await?;

        for table in DEVICE_ID_TABLES {
            let mut table_rows = 0u64;
            for (old, new) in mapping {
                let stmt = format!("UPDATE {table} SET device_id = $1 WHERE device_id = $2");
                let updated = sqlx::query(&stmt)
                    .bind(new)
                    .bind(old)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                table_rows += updated;
            }
            if table_rows > 0 {
                info!(table, rows = table_rows, "device ids rewritten");
            }
            stats.rows_updated += table_rows;
            stats.rows_per_table.insert((*table).to_owned(), table_rows);
        }

        // Verification: no old id may remain anywhere.
        for table in DEVICE_ID_TABLES {
            for old in mapping.keys() {
                let stmt = format!("SELECT COUNT(*)::BIGINT AS n FROM {table} WHERE device_id = $1");
                let n: i64 = sqlx::query(&stmt)
                    .bind(old)
                    .fetch_one(&mut *tx)
                    .await?
                    .try_get("n")?;
                if n > 0 {
                    warn!(table, old_id = %old, remaining = n, "verification failed, rolling back");
                    return Err(StoreError::Migration {
                        message: format!("{n} rows in {table} still reference old id {old}"),
                    });
                }
            }
        }

        tx.commit().await?;
        info!(
            mappings = stats.mappings_applied,
            rows = stats.rows_updated,
            "device id migration committed"
        );
        Ok(stats)
    }
}

// Alert storage: configurations (with explicit partial updates), trigger
// history, cooldowns, and maintenance windows.
//
// Operator/severity strings are validated by the engine before they reach
// this layer; the store treats them as opaque text.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use crate::model::{
    AlertConfigRow, AlertConfigUpdate, AlertCooldownRow, AlertHistoryRow, AlertStats,
    MaintenanceWindowRow, Recurrence, Severity,
};
use crate::{Store, StoreError};

/// Filters for history queries. Default = everything in the window.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub device_id: Option<Uuid>,
    pub metric_type: Option<String>,
    pub severity: Option<Severity>,
    pub unacknowledged_only: bool,
    pub days: Option<i64>,
    pub limit: Option<i64>,
}

impl Store {
    // ── Alert configurations ─────────────────────────────────────────

    pub async fn create_alert_config(
        &self,
        device_id: Uuid,
        metric_type: &str,
        threshold_value: f64,
        threshold_operator: &str,
        severity: &str,
        notification_channels: &[i64],
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r"INSERT INTO alert_configs
              (device_id, metric_type, threshold_value, threshold_operator,
               severity, enabled, notification_channels)
              VALUES ($1, $2, $3, $4, $5, TRUE, $6)
              RETURNING id",
        )
        .bind(device_id)
        .bind(metric_type)
        .bind(threshold_value)
        .bind(threshold_operator)
        .bind(severity)
        .bind(json!(notification_channels))
        .fetch_one(self.pool())
        .await?;

        let id: i64 = row.try_get("id")?;
        debug!(config = id, device = %device_id, metric = metric_type, "alert config created");
        Ok(id)
    }

    pub async fn alert_config(&self, id: i64) -> Result<Option<AlertConfigRow>, StoreError> {
        let row = sqlx::query_as::<_, AlertConfigRow>("SELECT * FROM alert_configs WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    pub async fn alert_configs(
        &self,
        device_id: Option<Uuid>,
        enabled_only: bool,
    ) -> Result<Vec<AlertConfigRow>, StoreError> {
        let rows = sqlx::query_as::<_, AlertConfigRow>(
            r"SELECT * FROM alert_configs
              WHERE ($1::uuid IS NULL OR device_id = $1)
                AND (NOT $2 OR enabled)
              ORDER BY created_at DESC",
        )
        .bind(device_id)
        .bind(enabled_only)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Apply an explicit partial update. Returns false when the config does
    /// not exist or the update is empty.
    pub async fn update_alert_config(
        &self,
        id: i64,
        update: &AlertConfigUpdate,
    ) -> Result<bool, StoreError> {
        if update.is_empty() {
            return Ok(false);
        }

        let channels = update.notification_channels.as_ref().map(|c| json!(c));
        let result = sqlx::query(
            r"UPDATE alert_configs SET
                  metric_type = COALESCE($2, metric_type),
                  threshold_value = COALESCE($3, threshold_value),
                  threshold_operator = COALESCE($4, threshold_operator),
                  severity = COALESCE($5, severity),
                  enabled = COALESCE($6, enabled),
                  notification_channels = COALESCE($7, notification_channels),
                  updated_at = NOW()
              WHERE id = $1",
        )
        .bind(id)
        .bind(update.metric_type.as_deref())
        .bind(update.threshold_value)
        .bind(update.threshold_operator.map(|o| o.to_string()))
        .bind(update.severity.map(|s| s.to_string()))
        .bind(update.enabled)
        .bind(channels)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a configuration and its cooldown record.
    pub async fn delete_alert_config(&self, id: i64) -> Result<bool, StoreError> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM alert_cooldowns WHERE alert_config_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM alert_configs WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    // ── History ──────────────────────────────────────────────────────

    /// Record one trigger event, returning the history row id.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_alert_history(
        &self,
        alert_config_id: i64,
        device_id: Uuid,
        metric_type: &str,
        threshold_value: f64,
        actual_value: f64,
        severity: &str,
        message: &str,
    ) -> Result<i64, StoreError> {
        let now = Utc::now();
        let row = sqlx::query(
            r"INSERT INTO alert_history
              (time, alert_config_id, device_id, metric_type, threshold_value,
               actual_value, severity, message, triggered_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $1)
              RETURNING id",
        )
        .bind(now)
        .bind(alert_config_id)
        .bind(device_id)
        .bind(metric_type)
        .bind(threshold_value)
        .bind(actual_value)
        .bind(severity)
        .bind(message)
        .fetch_one(self.pool())
        .await?;

        let id: i64 = row.try_get("id")?;
        info!(history = id, device = %device_id, metric = metric_type, "alert triggered");
        Ok(id)
    }

    pub async fn alert_history(
        &self,
        filter: &HistoryFilter,
    ) -> Result<Vec<AlertHistoryRow>, StoreError> {
        let cutoff = Utc::now() - Duration::days(filter.days.unwrap_or(7));
        let rows = sqlx::query_as::<_, AlertHistoryRow>(
            r"SELECT * FROM alert_history
              WHERE time > $1
                AND ($2::uuid IS NULL OR device_id = $2)
                AND ($3::text IS NULL OR metric_type = $3)
                AND ($4::text IS NULL OR severity = $4)
                AND (NOT $5 OR acknowledged_at IS NULL)
              ORDER BY time DESC
              LIMIT $6",
        )
        .bind(cutoff)
        .bind(filter.device_id)
        .bind(filter.metric_type.as_deref())
        .bind(filter.severity.map(|s| s.to_string()))
        .bind(filter.unacknowledged_only)
        .bind(filter.limit.unwrap_or(100))
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn acknowledge_alert(&self, id: i64, by: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE alert_history SET acknowledged_at = NOW(), acknowledged_by = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(by)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn resolve_alert(&self, id: i64, reason: Option<&str>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE alert_history SET resolved_at = NOW(), resolved_reason = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(reason)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Prune resolved history older than `days`. Unresolved rows are kept
    /// forever.
    pub async fn cleanup_resolved_history(&self, days: i64) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - Duration::days(days);
        let result =
            sqlx::query("DELETE FROM alert_history WHERE resolved_at IS NOT NULL AND time < $1")
                .bind(cutoff)
                .execute(self.pool())
                .await?;
        Ok(result.rows_affected())
    }

    /// Severity roll-up for the dashboard.
    pub async fn alert_stats(&self, device_id: Option<Uuid>) -> Result<AlertStats, StoreError> {
        let row = sqlx::query(
            r"SELECT
                  (SELECT COUNT(*) FROM alert_configs
                   WHERE $1::uuid IS NULL OR device_id = $1)::BIGINT AS total_configs,
                  (SELECT COUNT(*) FROM alert_configs
                   WHERE enabled AND ($1::uuid IS NULL OR device_id = $1))::BIGINT AS enabled_configs,
                  COUNT(*)::BIGINT AS total_alerts,
                  COUNT(*) FILTER (WHERE resolved_at IS NULL)::BIGINT AS unresolved_alerts,
                  COUNT(*) FILTER (WHERE severity = 'critical' AND acknowledged_at IS NULL)::BIGINT AS critical_alerts,
                  COUNT(*) FILTER (WHERE severity = 'warning' AND acknowledged_at IS NULL)::BIGINT AS warning_alerts,
                  COUNT(*) FILTER (WHERE severity = 'info' AND acknowledged_at IS NULL)::BIGINT AS info_alerts,
                  COUNT(*) FILTER (WHERE acknowledged_at IS NOT NULL AND resolved_at IS NULL)::BIGINT AS acknowledged_alerts
              FROM alert_history
              WHERE $1::uuid IS NULL OR device_id = $1",
        )
        .bind(device_id)
        .fetch_one(self.pool())
        .await?;

        Ok(AlertStats {
            total_configs: row.try_get("total_configs")?,
            enabled_configs: row.try_get("enabled_configs")?,
            total_alerts: row.try_get("total_alerts")?,
            unresolved_alerts: row.try_get("unresolved_alerts")?,
            critical_alerts: row.try_get("critical_alerts")?,
            warning_alerts: row.try_get("warning_alerts")?,
            info_alerts: row.try_get("info_alerts")?,
            acknowledged_alerts: row.try_get("acknowledged_alerts")?,
        })
    }

    // ── Cooldowns ────────────────────────────────────────────────────

    /// `true` if the `(device, config)` pair has an unexpired cooldown.
    pub async fn cooldown_active(
        &self,
        device_id: Uuid,
        alert_config_id: i64,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query_as::<_, AlertCooldownRow>(
            "SELECT * FROM alert_cooldowns WHERE device_id = $1 AND alert_config_id = $2",
        )
        .bind(device_id)
        .bind(alert_config_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.is_some_and(|r| r.cooldown_until > Utc::now()))
    }

    /// Upsert the cooldown expiry for a `(device, config)` pair.
    pub async fn set_cooldown(
        &self,
        device_id: Uuid,
        alert_config_id: i64,
        until: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO alert_cooldowns (device_id, alert_config_id, cooldown_until, created_at)
              VALUES ($1, $2, $3, NOW())
              ON CONFLICT (device_id, alert_config_id)
              DO UPDATE SET cooldown_until = EXCLUDED.cooldown_until, created_at = NOW()",
        )
        .bind(device_id)
        .bind(alert_config_id)
        .bind(until)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Delete expired cooldown records. Run by the 15-minute GC job.
    pub async fn clear_expired_cooldowns(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM alert_cooldowns WHERE cooldown_until < NOW()")
            .execute(self.pool())
            .await?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            debug!(deleted, "expired cooldowns cleared");
        }
        Ok(deleted)
    }

    // ── Maintenance windows ──────────────────────────────────────────

    pub async fn create_maintenance_window(
        &self,
        device_id: Option<Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        recurrence: Recurrence,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r"INSERT INTO maintenance_windows (device_id, start_time, end_time, recurrence, enabled)
              VALUES ($1, $2, $3, $4, TRUE)
              RETURNING id",
        )
        .bind(device_id)
        .bind(start)
        .bind(end)
        .bind(recurrence.to_string())
        .fetch_one(self.pool())
        .await?;
        Ok(row.try_get("id")?)
    }

    /// Enabled windows applying to a device: its own plus global ones.
    pub async fn maintenance_windows_for(
        &self,
        device_id: Uuid,
    ) -> Result<Vec<MaintenanceWindowRow>, StoreError> {
        let rows = sqlx::query_as::<_, MaintenanceWindowRow>(
            r"SELECT * FROM maintenance_windows
              WHERE enabled AND (device_id IS NULL OR device_id = $1)",
        )
        .bind(device_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn delete_maintenance_window(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM maintenance_windows WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// Scan storage: results, change events, schedules, and the execution
// queue.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value as Json;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::model::{
    ChangeType, ScanChangeEventRow, ScanQueueRow, ScanResultRow, ScanStatus, ScheduledScanRow,
    Severity,
};
use crate::{Store, StoreError};

/// Insertable scan result (the id and time are assigned here).
#[derive(Debug, Clone)]
pub struct NewScanResult {
    pub device_id: Uuid,
    pub target_ip: String,
    pub scan_profile: String,
    pub duration_seconds: Option<f64>,
    pub hostname: Option<String>,
    pub host_status: Option<String>,
    pub os_name: Option<String>,
    pub os_accuracy: Option<i32>,
    pub os_matches: Option<Json>,
    pub total_ports: i32,
    pub open_ports_count: i32,
    pub ports: Json,
    pub detail: Option<Json>,
    pub raw_output: Option<String>,
}

/// Filters for the change-event feed.
#[derive(Debug, Clone, Default)]
pub struct ChangeEventFilter {
    pub device_id: Option<Uuid>,
    pub target_ip: Option<String>,
    pub severity: Option<Severity>,
    pub unacknowledged_only: bool,
    pub days: Option<i64>,
    pub limit: Option<i64>,
}

impl Store {
    // ── Scan results ─────────────────────────────────────────────────

    pub async fn insert_scan_result(&self, result: &NewScanResult) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r"INSERT INTO scan_results (
                  time, device_id, target_ip, scan_profile, duration_seconds,
                  hostname, host_status, os_name, os_accuracy, os_matches,
                  total_ports, open_ports_count, ports, detail, raw_output
              ) VALUES (NOW(), $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
              RETURNING id",
        )
        .bind(result.device_id)
        .bind(&result.target_ip)
        .bind(&result.scan_profile)
        .bind(result.duration_seconds)
        .bind(result.hostname.as_deref())
        .bind(result.host_status.as_deref())
        .bind(result.os_name.as_deref())
        .bind(result.os_accuracy)
        .bind(result.os_matches.as_ref())
        .bind(result.total_ports)
        .bind(result.open_ports_count)
        .bind(&result.ports)
        .bind(result.detail.as_ref())
        .bind(result.raw_output.as_deref())
        .fetch_one(self.pool())
        .await?;

        let id: i64 = row.try_get("id")?;
        debug!(scan = id, target = %result.target_ip, "scan result stored");
        Ok(id)
    }

    /// The most recent scan of the same target before `before_id`.
    pub async fn last_scan_before(
        &self,
        device_id: Uuid,
        target_ip: &str,
        before_id: i64,
    ) -> Result<Option<ScanResultRow>, StoreError> {
        let row = sqlx::query_as::<_, ScanResultRow>(
            r"SELECT * FROM scan_results
              WHERE device_id = $1 AND target_ip = $2 AND id < $3
              ORDER BY time DESC
              LIMIT 1",
        )
        .bind(device_id)
        .bind(target_ip)
        .bind(before_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    pub async fn scan_history(
        &self,
        device_id: Uuid,
        target_ip: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ScanResultRow>, StoreError> {
        let rows = sqlx::query_as::<_, ScanResultRow>(
            r"SELECT * FROM scan_results
              WHERE device_id = $1 AND ($2::text IS NULL OR target_ip = $2)
              ORDER BY time DESC
              LIMIT $3",
        )
        .bind(device_id)
        .bind(target_ip)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    // ── Change events ────────────────────────────────────────────────

    pub async fn insert_change_event(
        &self,
        device_id: Uuid,
        target_ip: &str,
        change_type: ChangeType,
        severity: Severity,
        old_value: Option<&str>,
        new_value: Option<&str>,
        details: Option<&Json>,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r"INSERT INTO scan_change_events
              (time, device_id, target_ip, change_type, severity,
               old_value, new_value, details, acknowledged)
              VALUES (NOW(), $1, $2, $3, $4, $5, $6, $7, FALSE)
              RETURNING id",
        )
        .bind(device_id)
        .bind(target_ip)
        .bind(change_type.to_string())
        .bind(severity.to_string())
        .bind(old_value)
        .bind(new_value)
        .bind(details)
        .fetch_one(self.pool())
        .await?;

        let id: i64 = row.try_get("id")?;
        debug!(change = id, target = %target_ip, kind = %change_type, "change event stored");
        Ok(id)
    }

    pub async fn change_events(
        &self,
        filter: &ChangeEventFilter,
    ) -> Result<Vec<ScanChangeEventRow>, StoreError> {
        let cutoff = Utc::now() - Duration::days(filter.days.unwrap_or(30));
        let rows = sqlx::query_as::<_, ScanChangeEventRow>(
            r"SELECT * FROM scan_change_events
              WHERE time > $1
                AND ($2::uuid IS NULL OR device_id = $2)
                AND ($3::text IS NULL OR target_ip = $3)
                AND ($4::text IS NULL OR severity = $4)
                AND (NOT $5 OR NOT acknowledged)
              ORDER BY time DESC
              LIMIT $6",
        )
        .bind(cutoff)
        .bind(filter.device_id)
        .bind(filter.target_ip.as_deref())
        .bind(filter.severity.map(|s| s.to_string()))
        .bind(filter.unacknowledged_only)
        .bind(filter.limit.unwrap_or(100))
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn acknowledge_change(&self, id: i64, by: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"UPDATE scan_change_events
              SET acknowledged = TRUE, acknowledged_at = NOW(), acknowledged_by = $2
              WHERE id = $1",
        )
        .bind(id)
        .bind(by)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Scheduled scans ──────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn create_scheduled_scan(
        &self,
        device_id: Uuid,
        name: &str,
        target_type: &str,
        target_value: Option<&str>,
        scan_profile: &str,
        schedule_type: &str,
        schedule_value: &str,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r"INSERT INTO scheduled_scans
              (device_id, name, target_type, target_value, scan_profile,
               schedule_type, schedule_value, enabled)
              VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)
              RETURNING id",
        )
        .bind(device_id)
        .bind(name)
        .bind(target_type)
        .bind(target_value)
        .bind(scan_profile)
        .bind(schedule_type)
        .bind(schedule_value)
        .fetch_one(self.pool())
        .await?;
        Ok(row.try_get("id")?)
    }

    pub async fn scheduled_scans(
        &self,
        device_id: Option<Uuid>,
        enabled_only: bool,
    ) -> Result<Vec<ScheduledScanRow>, StoreError> {
        let rows = sqlx::query_as::<_, ScheduledScanRow>(
            r"SELECT * FROM scheduled_scans
              WHERE ($1::uuid IS NULL OR device_id = $1)
                AND (NOT $2 OR enabled)
              ORDER BY id",
        )
        .bind(device_id)
        .bind(enabled_only)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn scheduled_scan(&self, id: i64) -> Result<Option<ScheduledScanRow>, StoreError> {
        let row =
            sqlx::query_as::<_, ScheduledScanRow>("SELECT * FROM scheduled_scans WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(row)
    }

    pub async fn set_scheduled_scan_enabled(&self, id: i64, enabled: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE scheduled_scans SET enabled = $2 WHERE id = $1")
            .bind(id)
            .bind(enabled)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_scheduled_scan(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM scheduled_scans WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record the outcome of one schedule firing.
    pub async fn update_schedule_execution(
        &self,
        id: i64,
        status: &str,
        error: Option<&str>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"UPDATE scheduled_scans
              SET last_run_at = NOW(), last_run_status = $2,
                  last_run_error = $3, next_run_at = $4
              WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .bind(next_run)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    // ── Scan queue ───────────────────────────────────────────────────

    pub async fn enqueue_scan(
        &self,
        schedule_id: Option<i64>,
        device_id: Uuid,
        target_ip: &str,
        scan_profile: &str,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r"INSERT INTO scan_queue (schedule_id, device_id, target_ip, scan_profile, status)
              VALUES ($1, $2, $3, $4, 'queued')
              RETURNING id",
        )
        .bind(schedule_id)
        .bind(device_id)
        .bind(target_ip)
        .bind(scan_profile)
        .fetch_one(self.pool())
        .await?;
        Ok(row.try_get("id")?)
    }

    pub async fn queued_scans(&self, device_id: Uuid) -> Result<Vec<ScanQueueRow>, StoreError> {
        let rows = sqlx::query_as::<_, ScanQueueRow>(
            r"SELECT * FROM scan_queue
              WHERE device_id = $1 AND status = 'queued'
              ORDER BY queued_at",
        )
        .bind(device_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn scan_queue(&self, device_id: Option<Uuid>) -> Result<Vec<ScanQueueRow>, StoreError> {
        let rows = sqlx::query_as::<_, ScanQueueRow>(
            r"SELECT * FROM scan_queue
              WHERE $1::uuid IS NULL OR device_id = $1
              ORDER BY queued_at DESC
              LIMIT 500",
        )
        .bind(device_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Move a queue item to `running`.
    pub async fn mark_scan_running(&self, queue_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE scan_queue SET status = 'running', started_at = NOW() WHERE id = $1",
        )
        .bind(queue_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Move a queue item to its terminal state.
    pub async fn mark_scan_finished(
        &self,
        queue_id: i64,
        status: ScanStatus,
        scan_result_id: Option<i64>,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"UPDATE scan_queue
              SET status = $2, completed_at = NOW(), scan_result_id = $3, error_message = $4
              WHERE id = $1",
        )
        .bind(queue_id)
        .bind(status.to_string())
        .bind(scan_result_id)
        .bind(error_message)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

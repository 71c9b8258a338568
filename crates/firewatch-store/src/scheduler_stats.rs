// Scheduler self-report storage.

use chrono::{Duration, Utc};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::model::SchedulerStatsRow;
use crate::{Store, StoreError};

impl Store {
    /// Write one self-report row.
    pub async fn insert_scheduler_stats(
        &self,
        state: &str,
        total_executions: i64,
        total_errors: i64,
        uptime_seconds: i64,
        jobs: &Json,
        recent_executions: &Json,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO scheduler_stats
              (time, state, total_executions, total_errors, uptime_seconds, jobs, recent_executions)
              VALUES (NOW(), $1, $2, $3, $4, $5, $6)",
        )
        .bind(state)
        .bind(total_executions)
        .bind(total_errors)
        .bind(uptime_seconds)
        .bind(jobs)
        .bind(recent_executions)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// The most recent self-report, if any.
    pub async fn latest_scheduler_stats(&self) -> Result<Option<SchedulerStatsRow>, StoreError> {
        let row = sqlx::query_as::<_, SchedulerStatsRow>(
            "SELECT * FROM scheduler_stats ORDER BY time DESC LIMIT 1",
        )
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// Distinct device ids that have reported samples recently. Used by
    /// retention jobs that iterate the fleet without the registry.
    pub async fn recent_sample_devices(&self, days: i64) -> Result<Vec<Uuid>, StoreError> {
        let cutoff = Utc::now() - Duration::days(days);
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT DISTINCT device_id FROM throughput_samples WHERE time > $1",
        )
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

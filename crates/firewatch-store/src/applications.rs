// Application-sample repository: per-(device, app, tick) rows plus the
// windowed aggregations behind app-scoped alerts and the dashboard
// summary.

use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::model::{ApplicationSampleRow, ApplicationSummary};
use crate::{Store, StoreError};

impl Store {
    /// Insert one collection tick's worth of application rows in a single
    /// transaction.
    pub async fn insert_applications(
        &self,
        device_id: Uuid,
        batch: &[ApplicationSampleRow],
        time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool().begin().await?;
        for row in batch {
            sqlx::query(
                r"INSERT INTO application_samples (
                    time, device_id, app_name, category, sessions,
                    bytes_total, bytes_sent, bytes_received,
                    protocols, ports, vlans, zones, sources, destinations
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
            )
            .bind(time)
            .bind(device_id)
            .bind(&row.app_name)
            .bind(row.category.as_deref())
            .bind(row.sessions)
            .bind(row.bytes_total)
            .bind(row.bytes_sent)
            .bind(row.bytes_received)
            .bind(row.protocols.as_ref())
            .bind(row.ports.as_ref())
            .bind(row.vlans.as_ref())
            .bind(row.zones.as_ref())
            .bind(row.sources.as_ref())
            .bind(row.destinations.as_ref())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(device = %device_id, rows = batch.len(), "application samples stored");
        Ok(())
    }

    /// Rows from the most recent collection tick for a device.
    pub async fn latest_applications(
        &self,
        device_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ApplicationSampleRow>, StoreError> {
        let rows = sqlx::query_as::<_, ApplicationSampleRow>(
            r"SELECT * FROM application_samples
              WHERE device_id = $1
                AND time = (SELECT MAX(time) FROM application_samples WHERE device_id = $1)
              ORDER BY bytes_total DESC
              LIMIT $2",
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Total bytes attributed to one application over the trailing window.
    /// Backs the `app_<name>` alert metric.
    pub async fn app_bytes_in_window(
        &self,
        device_id: Uuid,
        app_name: &str,
        window: Duration,
    ) -> Result<i64, StoreError> {
        let cutoff = Utc::now() - window;
        let row = sqlx::query(
            r"SELECT COALESCE(SUM(bytes_total), 0)::BIGINT AS total
              FROM application_samples
              WHERE device_id = $1 AND app_name = $2 AND time >= $3",
        )
        .bind(device_id)
        .bind(app_name)
        .bind(cutoff)
        .fetch_one(self.pool())
        .await?;
        Ok(row.try_get("total")?)
    }

    /// The category with the most bytes over the trailing window.
    pub async fn top_category_by_bytes(
        &self,
        device_id: Uuid,
        window: Duration,
    ) -> Result<Option<(String, i64)>, StoreError> {
        let cutoff = Utc::now() - window;
        let row = sqlx::query(
            r"SELECT category, SUM(bytes_total)::BIGINT AS total
              FROM application_samples
              WHERE device_id = $1 AND time >= $2 AND category IS NOT NULL
              GROUP BY category
              ORDER BY total DESC
              LIMIT 1",
        )
        .bind(device_id)
        .bind(cutoff)
        .fetch_optional(self.pool())
        .await?;

        Ok(match row {
            Some(r) => Some((r.try_get("category")?, r.try_get("total")?)),
            None => None,
        })
    }

    /// Distinct-app / VLAN / zone counts and total bytes of the most
    /// recent collection tick.
    pub async fn application_summary(
        &self,
        device_id: Uuid,
    ) -> Result<ApplicationSummary, StoreError> {
        let row = sqlx::query(
            r"WITH latest AS (
                  SELECT * FROM application_samples
                  WHERE device_id = $1
                    AND time = (SELECT MAX(time) FROM application_samples WHERE device_id = $1)
              )
              SELECT
                  (SELECT COUNT(DISTINCT app_name) FROM latest)::BIGINT AS unique_apps,
                  (SELECT COUNT(DISTINCT v) FROM latest,
                      LATERAL jsonb_array_elements_text(COALESCE(vlans, '[]'::jsonb)) AS v)::BIGINT AS unique_vlans,
                  (SELECT COUNT(DISTINCT z) FROM latest,
                      LATERAL jsonb_array_elements_text(COALESCE(zones, '[]'::jsonb)) AS z)::BIGINT AS unique_zones,
                  (SELECT COALESCE(SUM(bytes_total), 0) FROM latest)::BIGINT AS total_bytes",
        )
        .bind(device_id)
        .fetch_one(self.pool())
        .await?;

        Ok(ApplicationSummary {
            unique_apps: row.try_get("unique_apps")?,
            unique_vlans: row.try_get("unique_vlans")?,
            unique_zones: row.try_get("unique_zones")?,
            total_bytes: row.try_get("total_bytes")?,
        })
    }
}

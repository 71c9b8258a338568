// Connected-device repository: batch inserts per collection tick and the
// "most recent per MAC" dashboard view, optionally enriched with per-IP
// bandwidth derived from the traffic log window.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::model::{ConnectedDeviceRow, IpBandwidth};
use crate::{Store, StoreError};

impl Store {
    /// Insert one collection tick's worth of connected-device rows in a
    /// single transaction.
    pub async fn insert_connected_devices(
        &self,
        device_id: Uuid,
        batch: &[ConnectedDeviceRow],
        time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool().begin().await?;
        for row in batch {
            sqlx::query(
                r"INSERT INTO connected_devices (
                    time, device_id, mac, ip, hostname, vlan, interface, zone,
                    vendor, is_virtual, is_randomized, virtual_reason,
                    custom_name, comment, location, tags
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
            )
            .bind(time)
            .bind(device_id)
            .bind(&row.mac)
            .bind(row.ip.as_deref())
            .bind(row.hostname.as_deref())
            .bind(row.vlan.as_deref())
            .bind(row.interface.as_deref())
            .bind(row.zone.as_deref())
            .bind(row.vendor.as_deref())
            .bind(row.is_virtual)
            .bind(row.is_randomized)
            .bind(row.virtual_reason.as_deref())
            .bind(row.custom_name.as_deref())
            .bind(row.comment.as_deref())
            .bind(row.location.as_deref())
            .bind(row.tags.as_ref())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(device = %device_id, rows = batch.len(), "connected devices stored");
        Ok(())
    }

    /// Most recent row per MAC within `max_age`.
    pub async fn latest_connected_devices(
        &self,
        device_id: Uuid,
        max_age: Duration,
    ) -> Result<Vec<ConnectedDeviceRow>, StoreError> {
        let cutoff = Utc::now() - max_age;
        let rows = sqlx::query_as::<_, ConnectedDeviceRow>(
            r"SELECT DISTINCT ON (mac) *
              FROM connected_devices
              WHERE device_id = $1 AND time > $2
              ORDER BY mac, time DESC",
        )
        .bind(device_id)
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Per-IP traffic volume over the trailing window, one row per
    /// (ip, direction) at or above `threshold_bytes`. Hostname is joined
    /// from the most recent connected-device row for the IP.
    pub async fn per_ip_bandwidth(
        &self,
        device_id: Uuid,
        window: Duration,
        threshold_bytes: i64,
    ) -> Result<Vec<IpBandwidth>, StoreError> {
        let cutoff = Utc::now() - window;
        let rows = sqlx::query_as::<_, IpBandwidth>(
            r"SELECT t.ip, t.direction, t.total_bytes, cd.hostname
              FROM (
                  SELECT source_ip AS ip, 'download' AS direction,
                         SUM(bytes_received)::BIGINT AS total_bytes
                  FROM traffic_logs
                  WHERE device_id = $1 AND time >= $2 AND source_ip IS NOT NULL
                        AND bytes_received IS NOT NULL
                  GROUP BY source_ip
                  HAVING SUM(bytes_received) >= $3
                  UNION ALL
                  SELECT source_ip AS ip, 'upload' AS direction,
                         SUM(bytes_sent)::BIGINT AS total_bytes
                  FROM traffic_logs
                  WHERE device_id = $1 AND time >= $2 AND source_ip IS NOT NULL
                        AND bytes_sent IS NOT NULL
                  GROUP BY source_ip
                  HAVING SUM(bytes_sent) >= $3
              ) t
              LEFT JOIN LATERAL (
                  SELECT hostname FROM connected_devices
                  WHERE device_id = $1 AND ip = t.ip
                  ORDER BY time DESC
                  LIMIT 1
              ) cd ON TRUE
              ORDER BY t.total_bytes DESC",
        )
        .bind(device_id)
        .bind(cutoff)
        .bind(threshold_bytes)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Rewrite every connected-device row matching the MAC with fresh
    /// metadata. Used when the operator edits metadata so history views
    /// reflect the new names immediately.
    pub async fn refresh_connected_metadata(
        &self,
        device_id: Uuid,
        mac: &str,
        custom_name: Option<&str>,
        comment: Option<&str>,
        location: Option<&str>,
        tags: &serde_json::Value,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"UPDATE connected_devices
              SET custom_name = $3, comment = $4, location = $5, tags = $6
              WHERE device_id = $1 AND mac = $2",
        )
        .bind(device_id)
        .bind(mac)
        .bind(custom_name)
        .bind(comment)
        .bind(location)
        .bind(tags)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }
}

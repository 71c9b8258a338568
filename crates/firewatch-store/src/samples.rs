// Throughput sample repository: idempotent inserts, latest-by-freshness,
// and range queries at raw/hourly/daily resolution.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::model::{Resolution, SamplePoint, ThroughputSample};
use crate::{InsertOutcome, Store, StoreError};

impl Store {
    /// Insert one sample. A row with the same `(device_id, time)` is left
    /// untouched and reported as [`InsertOutcome::Duplicate`].
    pub async fn insert_sample(
        &self,
        sample: &ThroughputSample,
    ) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            r"INSERT INTO throughput_samples (
                time, device_id,
                ibytes, obytes, ipackets, opackets,
                inbound_mbps, outbound_mbps, total_mbps,
                inbound_pps, outbound_pps, total_pps,
                sessions_active, sessions_tcp, sessions_udp, sessions_icmp, sessions_max,
                cpu_data_plane, cpu_mgmt_plane, memory_used_pct, uptime_seconds,
                critical_threats, high_threats, medium_threats, blocked_urls,
                critical_last_seen, high_last_seen, medium_last_seen, blocked_url_last_seen,
                interface_errors, interface_drops,
                license_expired, license_licensed,
                wan_ip, wan_speed, hostname, os_version,
                top_apps, interface_stats,
                top_category_lan, top_category_internet,
                top_internal_client, top_internet_client
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20,
                $21, $22, $23, $24, $25, $26, $27, $28, $29, $30,
                $31, $32, $33, $34, $35, $36, $37, $38, $39, $40,
                $41, $42, $43
            )
            ON CONFLICT (device_id, time) DO NOTHING",
        )
        .bind(sample.time)
        .bind(sample.device_id)
        .bind(sample.ibytes)
        .bind(sample.obytes)
        .bind(sample.ipackets)
        .bind(sample.opackets)
        .bind(sample.inbound_mbps)
        .bind(sample.outbound_mbps)
        .bind(sample.total_mbps)
        .bind(sample.inbound_pps)
        .bind(sample.outbound_pps)
        .bind(sample.total_pps)
        .bind(sample.sessions_active)
        .bind(sample.sessions_tcp)
        .bind(sample.sessions_udp)
        .bind(sample.sessions_icmp)
        .bind(sample.sessions_max)
        .bind(sample.cpu_data_plane)
        .bind(sample.cpu_mgmt_plane)
        .bind(sample.memory_used_pct)
        .bind(sample.uptime_seconds)
        .bind(sample.critical_threats)
        .bind(sample.high_threats)
        .bind(sample.medium_threats)
        .bind(sample.blocked_urls)
        .bind(sample.critical_last_seen.as_deref())
        .bind(sample.high_last_seen.as_deref())
        .bind(sample.medium_last_seen.as_deref())
        .bind(sample.blocked_url_last_seen.as_deref())
        .bind(sample.interface_errors)
        .bind(sample.interface_drops)
        .bind(sample.license_expired)
        .bind(sample.license_licensed)
        .bind(sample.wan_ip.as_deref())
        .bind(sample.wan_speed.as_deref())
        .bind(sample.hostname.as_deref())
        .bind(sample.os_version.as_deref())
        .bind(sample.top_apps.as_ref())
        .bind(sample.interface_stats.as_ref())
        .bind(sample.top_category_lan.as_ref())
        .bind(sample.top_category_internet.as_ref())
        .bind(sample.top_internal_client.as_ref())
        .bind(sample.top_internet_client.as_ref())
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            debug!(device = %sample.device_id, time = %sample.time, "duplicate sample skipped");
            Ok(InsertOutcome::Duplicate)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    /// The most recent sample for a device no older than `max_age`.
    pub async fn latest_sample(
        &self,
        device_id: Uuid,
        max_age: Duration,
    ) -> Result<Option<ThroughputSample>, StoreError> {
        let cutoff = Utc::now() - max_age;
        let row = sqlx::query_as::<_, ThroughputSample>(
            r"SELECT * FROM throughput_samples
              WHERE device_id = $1 AND time > $2
              ORDER BY time DESC
              LIMIT 1",
        )
        .bind(device_id)
        .bind(cutoff)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// Ordered series over `[from, to]` at the requested resolution.
    /// Hourly and daily resolutions are served from the continuous
    /// aggregates.
    pub async fn range_samples(
        &self,
        device_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        resolution: Resolution,
    ) -> Result<Vec<SamplePoint>, StoreError> {
        let query = match resolution {
            Resolution::Raw => {
                r"SELECT time AS bucket,
                         inbound_mbps, outbound_mbps, total_mbps,
                         inbound_pps, outbound_pps, total_pps,
                         sessions_active::DOUBLE PRECISION AS sessions_active,
                         cpu_data_plane, cpu_mgmt_plane, memory_used_pct
                  FROM throughput_samples
                  WHERE device_id = $1 AND time BETWEEN $2 AND $3
                  ORDER BY time"
            }
            Resolution::Hourly => {
                r"SELECT bucket,
                         inbound_mbps, outbound_mbps, total_mbps,
                         inbound_pps, outbound_pps, total_pps,
                         sessions_active,
                         cpu_data_plane, cpu_mgmt_plane, memory_used_pct
                  FROM throughput_samples_hourly
                  WHERE device_id = $1 AND bucket BETWEEN $2 AND $3
                  ORDER BY bucket"
            }
            Resolution::Daily => {
                r"SELECT bucket,
                         inbound_mbps, outbound_mbps, total_mbps,
                         inbound_pps, outbound_pps, total_pps,
                         sessions_active,
                         cpu_data_plane, cpu_mgmt_plane, memory_used_pct
                  FROM throughput_samples_daily
                  WHERE device_id = $1 AND bucket BETWEEN $2 AND $3
                  ORDER BY bucket"
            }
        };

        let rows = sqlx::query_as::<_, SamplePoint>(query)
            .bind(device_id)
            .bind(from)
            .bind(to)
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }
}

// Read-only facade served to the external HTTP layer.
//
// The collector owns all writes; this adapter only observes the
// latest-snapshot cache and queries the store. Nothing here leaks
// internals across the boundary — every method returns plain records.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use firewatch_store::alerts::HistoryFilter;
use firewatch_store::model::{
    AlertConfigRow, AlertHistoryRow, AlertStats, ApplicationSampleRow, ApplicationSummary,
    ConnectedDeviceRow, IpBandwidth, LogKind, LogRow, Resolution, SamplePoint,
    ScanChangeEventRow, ScanQueueRow, ScanResultRow, SchedulerStatsRow, ScheduledScanRow,
    ThroughputSample,
};
use firewatch_store::scans::ChangeEventFilter;
use firewatch_store::{Store, StoreError};

use crate::cache::SnapshotCache;

/// Default freshness bound for "latest" queries.
pub const DEFAULT_MAX_AGE_SECS: i64 = 30;

/// A connected device enriched with its traffic volume over a window.
#[derive(Debug, Clone)]
pub struct EnrichedConnectedDevice {
    pub device: ConnectedDeviceRow,
    pub download_bytes: i64,
    pub upload_bytes: i64,
}

/// Read-only query surface.
#[derive(Debug, Clone)]
pub struct ReadApi {
    store: Store,
    cache: Arc<SnapshotCache>,
}

impl ReadApi {
    pub fn new(store: Store, cache: Arc<SnapshotCache>) -> Self {
        Self { store, cache }
    }

    // ── Samples ──────────────────────────────────────────────────────

    /// Latest snapshot for a device, bounded by freshness (default 30 s).
    /// Served from the in-memory cache when possible.
    pub async fn latest_snapshot(
        &self,
        device: Uuid,
        max_age: Option<Duration>,
    ) -> Result<Option<ThroughputSample>, StoreError> {
        let max_age = max_age.unwrap_or_else(|| Duration::seconds(DEFAULT_MAX_AGE_SECS));

        if let Some(cached) = self.cache.latest(device, max_age) {
            return Ok(Some((*cached).clone()));
        }
        self.store.latest_sample(device, max_age).await
    }

    /// Time-range series at raw/hourly/daily resolution.
    pub async fn range_series(
        &self,
        device: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        resolution: Resolution,
    ) -> Result<Vec<SamplePoint>, StoreError> {
        self.store.range_samples(device, from, to, resolution).await
    }

    // ── Connected devices ────────────────────────────────────────────

    pub async fn connected_devices(
        &self,
        device: Uuid,
        max_age: Duration,
    ) -> Result<Vec<ConnectedDeviceRow>, StoreError> {
        self.store.latest_connected_devices(device, max_age).await
    }

    /// Connected devices joined with per-IP traffic volume over `window`.
    pub async fn connected_devices_with_bandwidth(
        &self,
        device: Uuid,
        max_age: Duration,
        window: Duration,
    ) -> Result<Vec<EnrichedConnectedDevice>, StoreError> {
        let rows = self.store.latest_connected_devices(device, max_age).await?;
        let bandwidth = self.store.per_ip_bandwidth(device, window, 0).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let (mut down, mut up) = (0i64, 0i64);
                if let Some(ip) = row.ip.as_deref() {
                    for entry in bandwidth.iter().filter(|b| b.ip == ip) {
                        if entry.direction == "upload" {
                            up += entry.total_bytes;
                        } else {
                            down += entry.total_bytes;
                        }
                    }
                }
                EnrichedConnectedDevice {
                    device: row,
                    download_bytes: down,
                    upload_bytes: up,
                }
            })
            .collect())
    }

    /// Per-IP bandwidth view on its own (dashboard top-talkers table).
    pub async fn per_ip_bandwidth(
        &self,
        device: Uuid,
        window: Duration,
        threshold_bytes: i64,
    ) -> Result<Vec<IpBandwidth>, StoreError> {
        self.store.per_ip_bandwidth(device, window, threshold_bytes).await
    }

    // ── Logs ─────────────────────────────────────────────────────────

    pub async fn recent_logs(
        &self,
        device: Uuid,
        kind: LogKind,
        limit: i64,
    ) -> Result<Vec<LogRow>, StoreError> {
        self.store.recent_logs(device, kind, limit).await
    }

    // ── Applications ─────────────────────────────────────────────────

    pub async fn applications_latest(
        &self,
        device: Uuid,
        limit: i64,
    ) -> Result<Vec<ApplicationSampleRow>, StoreError> {
        self.store.latest_applications(device, limit).await
    }

    pub async fn application_summary(&self, device: Uuid) -> Result<ApplicationSummary, StoreError> {
        self.store.application_summary(device).await
    }

    // ── Alerts ───────────────────────────────────────────────────────

    pub async fn alert_configs(
        &self,
        device: Option<Uuid>,
    ) -> Result<Vec<AlertConfigRow>, StoreError> {
        self.store.alert_configs(device, false).await
    }

    pub async fn alert_history(
        &self,
        filter: &HistoryFilter,
    ) -> Result<Vec<AlertHistoryRow>, StoreError> {
        self.store.alert_history(filter).await
    }

    pub async fn alert_stats(&self, device: Option<Uuid>) -> Result<AlertStats, StoreError> {
        self.store.alert_stats(device).await
    }

    // ── Scans ────────────────────────────────────────────────────────

    pub async fn scan_history(
        &self,
        device: Uuid,
        target_ip: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ScanResultRow>, StoreError> {
        self.store.scan_history(device, target_ip, limit).await
    }

    pub async fn change_events(
        &self,
        filter: &ChangeEventFilter,
    ) -> Result<Vec<ScanChangeEventRow>, StoreError> {
        self.store.change_events(filter).await
    }

    pub async fn scheduled_scans(
        &self,
        device: Option<Uuid>,
    ) -> Result<Vec<ScheduledScanRow>, StoreError> {
        self.store.scheduled_scans(device, false).await
    }

    pub async fn scan_queue(&self, device: Option<Uuid>) -> Result<Vec<ScanQueueRow>, StoreError> {
        self.store.scan_queue(device).await
    }

    // ── Scheduler ────────────────────────────────────────────────────

    pub async fn scheduler_stats(&self) -> Result<Option<SchedulerStatsRow>, StoreError> {
        self.store.latest_scheduler_stats().await
    }
}

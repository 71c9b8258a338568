//! Active-scan subsystem: target resolution, bounded execution, result
//! storage, and change detection.
//!
//! Every target is validated against RFC1918 twice — when a schedule
//! resolves its target set and again immediately before execution — and
//! the external scanner is always invoked with an argument list, never a
//! shell string. Per device, at most `max_concurrent` scans run at once.

pub mod diff;
pub mod nmap;
pub mod profile;

use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use serde_json::json;
use tokio::sync::{Semaphore, watch};
use tracing::{info, warn};
use uuid::Uuid;

use firewatch_config::ConfigSnapshot;
use firewatch_store::model::{
    ScanProfile, ScanQueueRow, ScanResultRow, ScanStatus, ScheduledScanRow, TargetType,
};
use firewatch_store::scans::NewScanResult;
use firewatch_store::Store;

use crate::registry::MetadataView;
use crate::scheduler::Trigger;
use crate::CoreError;

use diff::PreviousScan;
use nmap::ParsedScan;

/// Freshness bound when resolving schedule targets from the
/// connected-device view.
const TARGET_VIEW_MAX_AGE_MINUTES: i64 = 5;

/// Executes scans against operator-chosen targets.
pub struct ScanRunner {
    store: Store,
    config: watch::Receiver<Arc<ConfigSnapshot>>,
    max_concurrent: usize,
    /// Per-device concurrency gates, created lazily.
    gates: DashMap<Uuid, Arc<Semaphore>>,
}

impl std::fmt::Debug for ScanRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanRunner")
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

impl ScanRunner {
    pub fn new(
        store: Store,
        config: watch::Receiver<Arc<ConfigSnapshot>>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            config,
            max_concurrent: max_concurrent.max(1),
            gates: DashMap::new(),
        }
    }

    fn gate(&self, device: Uuid) -> Arc<Semaphore> {
        self.gates
            .entry(device)
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_concurrent)))
            .clone()
    }

    fn tz_offset(&self) -> chrono::FixedOffset {
        let minutes = self.config.borrow().settings.timezone_offset_minutes;
        chrono::FixedOffset::east_opt(minutes * 60)
            .unwrap_or_else(|| chrono::FixedOffset::east_opt(0).expect("zero offset is valid"))
    }

    // ── Ad-hoc entry point ───────────────────────────────────────────

    /// Queue and immediately execute a single operator-requested scan.
    /// Safety rejection happens before any queue row exists.
    pub async fn run_adhoc(
        &self,
        device_id: Uuid,
        target: &str,
        scan_profile: ScanProfile,
    ) -> Result<i64, CoreError> {
        profile::validate_target(target)?;

        let queue_id = self
            .store
            .enqueue_scan(None, device_id, target, &scan_profile.to_string())
            .await?;
        self.process_queue(device_id).await;
        Ok(queue_id)
    }

    // ── Schedule execution ───────────────────────────────────────────

    /// Fire one scheduled scan: resolve targets, enqueue, drain the queue,
    /// record the execution outcome.
    pub async fn execute_schedule(&self, schedule_id: i64) -> Result<(), CoreError> {
        let Some(schedule) = self.store.scheduled_scan(schedule_id).await? else {
            warn!(schedule = schedule_id, "schedule vanished, skipping");
            return Ok(());
        };
        if !schedule.enabled {
            return Ok(());
        }

        let next_run = Trigger::parse(&schedule.schedule_type, &schedule.schedule_value)
            .ok()
            .and_then(|t| t.next_fire(Utc::now(), self.tz_offset()));

        let targets = match self.resolve_targets(&schedule).await {
            Ok(t) => t,
            Err(e) => {
                self.store
                    .update_schedule_execution(schedule_id, "failed", Some(&e.to_string()), next_run)
                    .await?;
                return Err(e);
            }
        };

        if targets.is_empty() {
            info!(schedule = schedule_id, "no targets resolved, skipping");
            self.store
                .update_schedule_execution(schedule_id, "skipped", Some("no targets found"), next_run)
                .await?;
            return Ok(());
        }

        let mut queued = 0usize;
        for target in &targets {
            // Safety gate at schedule execution: non-private addresses in
            // the connected view are skipped, never scanned.
            if let Err(e) = profile::validate_target(target) {
                warn!(schedule = schedule_id, target = %target, error = %e, "target rejected");
                continue;
            }
            self.store
                .enqueue_scan(
                    Some(schedule_id),
                    schedule.device_id,
                    target,
                    &schedule.scan_profile,
                )
                .await?;
            queued += 1;
        }
        info!(schedule = schedule_id, targets = targets.len(), queued, "schedule resolved");

        self.process_queue(schedule.device_id).await;

        self.store
            .update_schedule_execution(schedule_id, "success", None, next_run)
            .await?;
        Ok(())
    }

    /// Resolve a schedule's target selector against the current
    /// connected-device view and metadata.
    async fn resolve_targets(&self, schedule: &ScheduledScanRow) -> Result<Vec<String>, CoreError> {
        let target_type =
            TargetType::from_str(&schedule.target_type).map_err(|_| CoreError::Validation {
                field: "target_type".into(),
                reason: format!("unknown target type '{}'", schedule.target_type),
            })?;

        if target_type == TargetType::Ip {
            return Ok(schedule.target_value.iter().cloned().collect());
        }

        let connected = self
            .store
            .latest_connected_devices(
                schedule.device_id,
                Duration::minutes(TARGET_VIEW_MAX_AGE_MINUTES),
            )
            .await?;

        let snapshot = self.config.borrow().clone();
        let metadata = MetadataView::for_device(&snapshot, schedule.device_id);

        let ips = connected
            .into_iter()
            .filter(|row| match target_type {
                TargetType::All => true,
                TargetType::Tag => {
                    let Some(tag) = schedule.target_value.as_deref() else {
                        return false;
                    };
                    metadata
                        .get(&row.mac)
                        .is_some_and(|m| m.tags.iter().any(|t| t == tag))
                }
                TargetType::Location => {
                    let Some(location) = schedule.target_value.as_deref() else {
                        return false;
                    };
                    metadata
                        .get(&row.mac)
                        .is_some_and(|m| m.location.as_deref() == Some(location))
                }
                TargetType::Ip => unreachable!("handled above"),
            })
            .filter_map(|row| row.ip)
            .collect();

        Ok(ips)
    }

    // ── Queue processing ─────────────────────────────────────────────

    /// Drain the device's queued scans, bounded by the per-device
    /// concurrency gate.
    pub async fn process_queue(&self, device_id: Uuid) {
        let queued = match self.store.queued_scans(device_id).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(device = %device_id, error = %e, "failed to read scan queue");
                return;
            }
        };
        if queued.is_empty() {
            return;
        }

        let gate = self.gate(device_id);
        let executions = queued.into_iter().map(|item| {
            let gate = Arc::clone(&gate);
            async move {
                // Closed semaphores don't occur here; treat failure as skip.
                let Ok(_permit) = gate.acquire().await else {
                    return;
                };
                self.execute_queued(item).await;
            }
        });
        join_all(executions).await;
    }

    /// Run one queue item through its full lifecycle.
    async fn execute_queued(&self, item: ScanQueueRow) {
        let queue_id = item.id;
        if let Err(e) = self.store.mark_scan_running(queue_id).await {
            warn!(queue = queue_id, error = %e, "failed to mark scan running");
            return;
        }

        let outcome = self.run_and_store(&item).await;
        let (status, result_id, error) = match outcome {
            Ok(result_id) => (ScanStatus::Completed, Some(result_id), None),
            Err(e) => (ScanStatus::Failed, None, Some(e.to_string())),
        };

        if let Err(e) = self
            .store
            .mark_scan_finished(queue_id, status, result_id, error.as_deref())
            .await
        {
            warn!(queue = queue_id, error = %e, "failed to finalize scan queue item");
        }
    }

    /// Execute the scan, persist the result, and record change events
    /// against the previous scan of the same target.
    async fn run_and_store(&self, item: &ScanQueueRow) -> Result<i64, CoreError> {
        // Safety gate immediately before execution.
        let target = profile::validate_target(&item.target_ip)?;
        let scan_profile =
            ScanProfile::from_str(&item.scan_profile).unwrap_or_default();

        let (parsed, raw) = nmap::run_scan(target, scan_profile).await?;

        let result_id = self
            .store
            .insert_scan_result(&build_result(item, &parsed, raw))
            .await?;

        self.detect_and_store_changes(item, result_id, &parsed).await;
        Ok(result_id)
    }

    /// Diff against the previous result for the same (device, target) and
    /// store one event per difference. Failures here are logged only; the
    /// scan result itself is already persisted.
    async fn detect_and_store_changes(&self, item: &ScanQueueRow, result_id: i64, parsed: &ParsedScan) {
        let previous = match self
            .store
            .last_scan_before(item.device_id, &item.target_ip, result_id)
            .await
        {
            Ok(Some(prev)) => prev,
            Ok(None) => return, // first scan of this target
            Err(e) => {
                warn!(target = %item.target_ip, error = %e, "failed to load previous scan");
                return;
            }
        };

        let changes = diff::detect_changes(
            &previous_scan_view(&previous),
            parsed.best_os().map(|m| m.name.as_str()),
            &parsed.ports,
        );

        for change in changes {
            if let Err(e) = self
                .store
                .insert_change_event(
                    item.device_id,
                    &item.target_ip,
                    change.change_type,
                    change.severity,
                    change.old_value.as_deref(),
                    change.new_value.as_deref(),
                    Some(&change.details),
                )
                .await
            {
                warn!(target = %item.target_ip, error = %e, "failed to store change event");
            }
        }
    }
}

fn build_result(item: &ScanQueueRow, parsed: &ParsedScan, raw: String) -> NewScanResult {
    let best_os = parsed.best_os();
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    NewScanResult {
        device_id: item.device_id,
        target_ip: item.target_ip.clone(),
        scan_profile: item.scan_profile.clone(),
        duration_seconds: parsed.duration_seconds,
        hostname: parsed.hostname.clone(),
        host_status: parsed.host_status.clone(),
        os_name: best_os.map(|m| m.name.clone()),
        os_accuracy: best_os.and_then(|m| m.accuracy),
        os_matches: serde_json::to_value(&parsed.os_matches).ok(),
        total_ports: parsed.ports.len() as i32,
        open_ports_count: parsed.open_ports().count() as i32,
        ports: serde_json::to_value(&parsed.ports).unwrap_or_else(|_| json!([])),
        detail: Some(json!({
            "ip": parsed.ip,
            "hostname": parsed.hostname,
            "status": parsed.host_status,
            "os_matches": parsed.os_matches,
            "ports": parsed.ports,
            "duration": parsed.duration_seconds,
        })),
        raw_output: Some(raw),
    }
}

fn previous_scan_view(row: &ScanResultRow) -> PreviousScan {
    PreviousScan {
        os_name: row.os_name.clone(),
        ports: serde_json::from_value(row.ports.clone()).unwrap_or_default(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn result_row(ports: serde_json::Value, os_name: Option<&str>) -> ScanResultRow {
        ScanResultRow {
            id: 1,
            time: Utc::now(),
            device_id: Uuid::new_v4(),
            target_ip: "192.168.1.50".into(),
            scan_profile: "balanced".into(),
            duration_seconds: Some(12.0),
            hostname: None,
            host_status: Some("up".into()),
            os_name: os_name.map(str::to_owned),
            os_accuracy: None,
            os_matches: None,
            total_ports: 0,
            open_ports_count: 0,
            ports,
            detail: None,
            raw_output: None,
        }
    }

    #[test]
    fn previous_scan_view_round_trips_ports() {
        let ports = json!([
            {"port": 22, "protocol": "tcp", "state": "open", "service": "ssh", "product": null, "version": null}
        ]);
        let view = previous_scan_view(&result_row(ports, Some("Linux 5.4")));
        assert_eq!(view.ports.len(), 1);
        assert_eq!(view.ports[0].port, 22);
        assert_eq!(view.os_name.as_deref(), Some("Linux 5.4"));
    }

    #[test]
    fn previous_scan_view_tolerates_malformed_blob() {
        let view = previous_scan_view(&result_row(json!("garbage"), None));
        assert!(view.ports.is_empty());
    }
}

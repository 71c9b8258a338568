//! Per-device polling pipeline.
//!
//! One [`DeviceCollector`] exists per enabled device; the scheduler drives
//! its four ticks (throughput 5 s, connected devices / applications / logs
//! 60 s). Within a tick, sub-fetches run concurrently; any sub-fetch may
//! fail individually and simply leaves its fields empty. Only a failure of
//! the core interface-counter fetch aborts the throughput tick.

pub mod enrich;
pub mod rates;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use futures_util::future::join_all;
use serde_json::json;
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use firewatch_api::types::{AppStatistics, ThreatLogEntry, UrlLogEntry};
use firewatch_api::{Fetched, FirewallClient, retry};
use firewatch_config::ConfigSnapshot;
use firewatch_store::model::{
    ApplicationSampleRow, ConnectedDeviceRow, LogKind, LogRow, ThroughputSample,
};
use firewatch_store::Store;

use crate::cache::SnapshotCache;
use crate::registry::{Device, MetadataView, normalize_mac};
use crate::CoreError;

use enrich::{RdnsResolver, SharedVendorDb, classify_mac, traffic_split};
use rates::RateWindow;

/// Endpoint lists stored per application are capped at this many entries,
/// keeping the biggest talkers.
const ENDPOINT_CAP: usize = 50;

/// How many top applications are embedded in each throughput sample.
const TOP_APPS_IN_SAMPLE: usize = 10;

/// Collector for one device. The rate window is owned here and touched by
/// no other task.
pub struct DeviceCollector {
    device: Arc<Device>,
    client: Arc<FirewallClient>,
    store: Store,
    cache: Arc<SnapshotCache>,
    config: watch::Receiver<Arc<ConfigSnapshot>>,
    vendor: SharedVendorDb,
    rdns: Arc<RdnsResolver>,
    rates: Mutex<RateWindow>,
    log_fetch_count: u32,
}

impl std::fmt::Debug for DeviceCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCollector")
            .field("device", &self.device.name)
            .finish_non_exhaustive()
    }
}

/// Unwrap a sub-fetch, logging and degrading to None on failure.
fn sub_fetch<T>(device: &str, op: &str, result: Result<Fetched<T>, firewatch_api::Error>) -> Option<T> {
    match result {
        Ok(fetched) => {
            debug!(device, op, latency_ms = fetched.latency.as_millis() as u64, "sub-fetch ok");
            Some(fetched.value)
        }
        Err(e) => {
            warn!(device, op, error = %e, "sub-fetch failed (field left empty)");
            None
        }
    }
}

fn opt_json<T: serde::Serialize>(value: &Option<T>) -> Option<serde_json::Value> {
    value.as_ref().and_then(|v| serde_json::to_value(v).ok())
}

/// Parse a firewall log timestamp (`YYYY/MM/DD HH:MM:SS`), falling back to
/// the collection instant.
fn parse_log_time(raw: Option<&str>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    raw.and_then(|s| NaiveDateTime::parse_from_str(s, "%Y/%m/%d %H:%M:%S").ok())
        .map_or(fallback, |naive| naive.and_utc())
}

impl DeviceCollector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: Arc<Device>,
        client: Arc<FirewallClient>,
        store: Store,
        cache: Arc<SnapshotCache>,
        config: watch::Receiver<Arc<ConfigSnapshot>>,
        vendor: SharedVendorDb,
        rdns: Arc<RdnsResolver>,
        log_fetch_count: u32,
    ) -> Self {
        Self {
            device,
            client,
            store,
            cache,
            config,
            vendor,
            rdns,
            rates: Mutex::new(RateWindow::new()),
            log_fetch_count,
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    // ── Throughput tick (5 s) ────────────────────────────────────────

    /// One throughput tick: core counter fetch, rate derivation,
    /// concurrent sub-fetches, sample assembly, idempotent insert,
    /// cache publish.
    #[allow(clippy::too_many_lines, clippy::cast_possible_wrap)]
    pub async fn throughput_tick(&self) -> Result<(), CoreError> {
        let name = self.device.name.as_str();
        let iface = self.device.monitored_interface.clone();

        // Core fetch: a failure here means no sample this tick.
        let counters = retry::with_retries("interface_counters", || {
            self.client.interface_counters(&iface)
        })
        .await?
        .value;

        let now = Utc::now();
        let rates = self.rates.lock().await.advance(&counters, now);

        // Everything else degrades field-by-field.
        let (session, resources, all_counters, license, system, apps, threats, urls) = tokio::join!(
            self.client.session_info(),
            self.client.resource_utilization(),
            self.client.all_interface_counters(),
            self.client.license_info(),
            self.client.system_info(),
            self.client.application_statistics(),
            self.client.threat_logs(self.log_fetch_count),
            self.client.url_filtering_logs(self.log_fetch_count),
        );

        let session = sub_fetch(name, "session_info", session);
        let resources = sub_fetch(name, "resource_utilization", resources);
        let all_counters = sub_fetch(name, "interface_counters_all", all_counters);
        let license = sub_fetch(name, "license_info", license);
        let system = sub_fetch(name, "system_info", system);
        let apps = sub_fetch(name, "application_statistics", apps);
        let threats = sub_fetch(name, "threat_logs", threats);
        let urls = sub_fetch(name, "url_filtering_logs", urls);

        let wan = match &self.device.wan_interface {
            Some(wan_iface) => sub_fetch(name, "wan_status", self.client.wan_status(wan_iface).await),
            None => None,
        };

        // Threat counters with per-level last-seen (entries arrive newest
        // first).
        let threat_entries = threats.unwrap_or_default();
        let count_severity = |level: &str| -> (i64, Option<String>) {
            let mut count = 0i64;
            let mut last_seen = None;
            for entry in &threat_entries {
                if entry.severity.as_deref() == Some(level) {
                    count += 1;
                    if last_seen.is_none() {
                        last_seen.clone_from(&entry.time);
                    }
                }
            }
            (count, last_seen)
        };
        let (critical_threats, critical_last_seen) = count_severity("critical");
        let (high_threats, high_last_seen) = count_severity("high");
        let (medium_threats, medium_last_seen) = count_severity("medium");

        let url_entries = urls.unwrap_or_default();
        let blocked: Vec<&UrlLogEntry> = url_entries
            .iter()
            .filter(|u| u.action.as_deref().is_some_and(|a| a.contains("block")))
            .collect();
        let blocked_urls = blocked.len() as i64;
        let blocked_url_last_seen = blocked.first().and_then(|u| u.time.clone());

        // Interface totals and per-interface blob.
        let (interface_errors, interface_drops, interface_stats) = match &all_counters {
            Some(list) => {
                let errors: u64 = list.iter().map(|c| c.ierrors).sum();
                let drops: u64 = list.iter().map(|c| c.idrops).sum();
                let blob = json!(
                    list.iter()
                        .map(|c| {
                            json!({
                                "name": c.name,
                                "ibytes": c.ibytes,
                                "obytes": c.obytes,
                                "ierrors": c.ierrors,
                                "idrops": c.idrops,
                            })
                        })
                        .collect::<Vec<_>>()
                );
                (Some(errors as i64), Some(drops as i64), Some(blob))
            }
            None => (None, None, None),
        };

        // Top applications and the internal/internet split.
        let app_list = apps.unwrap_or_default();
        let top_apps = (!app_list.is_empty()).then(|| {
            let mut sorted: Vec<&AppStatistics> = app_list.iter().collect();
            sorted.sort_by_key(|a| std::cmp::Reverse(a.bytes));
            json!(
                sorted
                    .iter()
                    .take(TOP_APPS_IN_SAMPLE)
                    .map(|a| {
                        json!({
                            "name": a.name,
                            "category": a.category,
                            "bytes": a.bytes,
                            "sessions": a.sessions,
                        })
                    })
                    .collect::<Vec<_>>()
            )
        });
        let split = traffic_split(&app_list);

        let sample = ThroughputSample {
            time: now,
            device_id: self.device.id,
            ibytes: counters.ibytes as i64,
            obytes: counters.obytes as i64,
            ipackets: counters.ipackets as i64,
            opackets: counters.opackets as i64,
            inbound_mbps: rates.inbound_mbps,
            outbound_mbps: rates.outbound_mbps,
            total_mbps: rates.total_mbps,
            inbound_pps: rates.inbound_pps,
            outbound_pps: rates.outbound_pps,
            total_pps: rates.total_pps,
            sessions_active: session.as_ref().and_then(|s| s.active),
            sessions_tcp: session.as_ref().and_then(|s| s.tcp),
            sessions_udp: session.as_ref().and_then(|s| s.udp),
            sessions_icmp: session.as_ref().and_then(|s| s.icmp),
            sessions_max: session.as_ref().and_then(|s| s.max),
            cpu_data_plane: resources.as_ref().and_then(|r| r.data_plane_cpu),
            cpu_mgmt_plane: resources.as_ref().and_then(|r| r.mgmt_plane_cpu),
            memory_used_pct: resources.as_ref().and_then(|r| r.memory_used_pct),
            uptime_seconds: system.as_ref().and_then(|s| s.uptime_seconds),
            critical_threats,
            high_threats,
            medium_threats,
            blocked_urls,
            critical_last_seen,
            high_last_seen,
            medium_last_seen,
            blocked_url_last_seen,
            interface_errors,
            interface_drops,
            license_expired: license.map(|l| l.expired),
            license_licensed: license.map(|l| l.licensed),
            wan_ip: wan.as_ref().and_then(|w| w.ip.clone()),
            wan_speed: wan.as_ref().and_then(|w| w.speed.clone()),
            hostname: system.as_ref().and_then(|s| s.hostname.clone()),
            os_version: system.as_ref().and_then(|s| s.sw_version.clone()),
            top_apps,
            interface_stats,
            top_category_lan: opt_json(&split.top_category_lan),
            top_category_internet: opt_json(&split.top_category_internet),
            top_internal_client: opt_json(&split.top_internal_client),
            top_internet_client: opt_json(&split.top_internet_client),
        };

        self.store.insert_sample(&sample).await?;
        self.cache.update(sample);
        Ok(())
    }

    // ── Connected devices tick (60 s) ────────────────────────────────

    /// Collect the connected-device view: ARP ground truth joined with
    /// DHCP hostnames, reverse DNS for the unnamed, vendor lookup,
    /// virtual-MAC classification, and metadata merge.
    pub async fn connected_tick(&self) -> Result<(), CoreError> {
        let name = self.device.name.as_str();

        let (arp, leases) = tokio::join!(self.client.arp_table(), self.client.dhcp_leases());
        let arp = retryless_core(arp)?;
        let leases = sub_fetch(name, "dhcp_leases", leases).unwrap_or_default();

        let lease_by_mac: HashMap<String, _> = leases
            .into_iter()
            .map(|l| (normalize_mac(&l.mac), l))
            .collect();

        let snapshot = self.config.borrow().clone();
        let metadata = MetadataView::for_device(&snapshot, self.device.id);
        let now = Utc::now();

        // Reverse DNS only for entries the lease table could not name.
        let rows = join_all(arp.into_iter().map(|entry| {
            let lease = lease_by_mac.get(&normalize_mac(&entry.mac)).cloned();
            let rdns = Arc::clone(&self.rdns);
            async move {
                let hostname = match lease.as_ref().and_then(|l| l.hostname.clone()) {
                    Some(h) => Some(h),
                    None => match entry.ip.parse::<IpAddr>() {
                        Ok(addr) => Some(
                            rdns.lookup(addr)
                                .await
                                .unwrap_or_else(|| entry.ip.clone()),
                        ),
                        Err(_) => Some(entry.ip.clone()),
                    },
                };
                (entry, hostname)
            }
        }))
        .await
        .into_iter()
        .map(|(entry, hostname)| {
            let mac = normalize_mac(&entry.mac);
            let vendor = self.vendor.vendor_for(&mac);
            let class = classify_mac(&mac, vendor.as_deref());
            let meta = metadata.get(&mac);

            // Sub-interface suffix carries the VLAN tag
            // (e.g. "ethernet1/2.30" -> VLAN 30).
            let vlan = entry
                .interface
                .as_deref()
                .and_then(|i| i.rsplit_once('.'))
                .map(|(_, tag)| tag.to_owned());

            ConnectedDeviceRow {
                time: now,
                device_id: self.device.id,
                mac,
                ip: Some(entry.ip),
                hostname,
                vlan,
                interface: entry.interface,
                zone: entry.zone,
                vendor,
                is_virtual: class.is_virtual,
                is_randomized: class.is_randomized,
                virtual_reason: class.reason,
                custom_name: meta.and_then(|m| m.custom_name.clone()),
                comment: meta.and_then(|m| m.comment.clone()),
                location: meta.and_then(|m| m.location.clone()),
                tags: meta.map(|m| json!(m.tags)),
            }
        })
        .collect::<Vec<_>>();

        self.store
            .insert_connected_devices(self.device.id, &rows, now)
            .await?;
        debug!(device = name, rows = rows.len(), "connected devices collected");
        Ok(())
    }

    // ── Applications tick (60 s) ─────────────────────────────────────

    pub async fn applications_tick(&self) -> Result<(), CoreError> {
        let apps = self.client.application_statistics().await?.value;
        let now = Utc::now();

        let rows: Vec<ApplicationSampleRow> = apps
            .into_iter()
            .map(|mut app| {
                // Keep only the biggest talkers on each side.
                app.sources.sort_by_key(|e| std::cmp::Reverse(e.bytes));
                app.sources.truncate(ENDPOINT_CAP);
                app.destinations.sort_by_key(|e| std::cmp::Reverse(e.bytes));
                app.destinations.truncate(ENDPOINT_CAP);

                ApplicationSampleRow {
                    time: now,
                    device_id: self.device.id,
                    app_name: app.name,
                    category: app.category,
                    sessions: app.sessions,
                    bytes_total: app.bytes,
                    bytes_sent: app.bytes_sent,
                    bytes_received: app.bytes_received,
                    protocols: Some(json!(app.protocols)),
                    ports: Some(json!(app.ports)),
                    vlans: Some(json!(app.vlans)),
                    zones: Some(json!(app.zones)),
                    sources: Some(json!(app.sources)),
                    destinations: Some(json!(app.destinations)),
                }
            })
            .collect();

        self.store
            .insert_applications(self.device.id, &rows, now)
            .await?;
        Ok(())
    }

    // ── Logs tick (60 s) ─────────────────────────────────────────────

    /// Pull the four log categories and append them to their rolling
    /// windows. Each category degrades independently.
    pub async fn logs_tick(&self) -> Result<(), CoreError> {
        let name = self.device.name.as_str();
        let n = self.log_fetch_count;
        let now = Utc::now();

        let (threats, urls, system, traffic) = tokio::join!(
            self.client.threat_logs(n),
            self.client.url_filtering_logs(n),
            self.client.system_logs(n),
            self.client.traffic_logs(n),
        );

        if let Some(entries) = sub_fetch(name, "threat_logs", threats) {
            let rows: Vec<LogRow> = entries.iter().map(|e| threat_row(e, now)).collect();
            self.store
                .insert_logs(self.device.id, LogKind::Threat, &rows)
                .await?;
        }
        if let Some(entries) = sub_fetch(name, "url_filtering_logs", urls) {
            let rows: Vec<LogRow> = entries.iter().map(|e| url_row(e, now)).collect();
            self.store
                .insert_logs(self.device.id, LogKind::Url, &rows)
                .await?;
        }
        if let Some(entries) = sub_fetch(name, "system_logs", system) {
            let rows: Vec<LogRow> = entries
                .iter()
                .map(|e| LogRow {
                    time: parse_log_time(e.time.as_deref(), now),
                    device_id: self.device.id,
                    severity: e.severity.clone(),
                    name: e.event_id.clone(),
                    description: e.description.clone(),
                    details: serde_json::to_value(e).ok(),
                    ..LogRow::default()
                })
                .collect();
            self.store
                .insert_logs(self.device.id, LogKind::System, &rows)
                .await?;
        }
        if let Some(entries) = sub_fetch(name, "traffic_logs", traffic) {
            let rows: Vec<LogRow> = entries
                .iter()
                .map(|e| LogRow {
                    time: parse_log_time(e.time.as_deref(), now),
                    device_id: self.device.id,
                    source_ip: e.source_ip.clone(),
                    dest_ip: e.dest_ip.clone(),
                    app: e.app.clone(),
                    action: e.action.clone(),
                    bytes_sent: e.bytes_sent,
                    bytes_received: e.bytes_received,
                    details: serde_json::to_value(e).ok(),
                    ..LogRow::default()
                })
                .collect();
            self.store
                .insert_logs(self.device.id, LogKind::Traffic, &rows)
                .await?;
        }

        Ok(())
    }
}

fn threat_row(e: &ThreatLogEntry, fallback: DateTime<Utc>) -> LogRow {
    LogRow {
        time: parse_log_time(e.time.as_deref(), fallback),
        severity: e.severity.clone(),
        name: e.threat_name.clone(),
        source_ip: e.source_ip.clone(),
        dest_ip: e.dest_ip.clone(),
        app: e.app.clone(),
        action: e.action.clone(),
        category: e.category.clone(),
        rule: e.rule.clone(),
        details: serde_json::to_value(e).ok(),
        ..LogRow::default()
    }
}

fn url_row(e: &UrlLogEntry, fallback: DateTime<Utc>) -> LogRow {
    LogRow {
        time: parse_log_time(e.time.as_deref(), fallback),
        source_ip: e.source_ip.clone(),
        dest_ip: e.dest_ip.clone(),
        action: e.action.clone(),
        category: e.category.clone(),
        url: e.url.clone(),
        details: serde_json::to_value(e).ok(),
        ..LogRow::default()
    }
}

/// The ARP fetch is the core of the connected-device tick; its failure
/// aborts the tick (next tick retries).
fn retryless_core<T>(
    result: Result<Fetched<T>, firewatch_api::Error>,
) -> Result<T, CoreError> {
    Ok(result?.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_time_parses_firewall_format() {
        let fallback = Utc::now();
        let parsed = parse_log_time(Some("2026/07/30 11:22:33"), fallback);
        assert_eq!(parsed.format("%Y-%m-%d %H:%M:%S").to_string(), "2026-07-30 11:22:33");
    }

    #[test]
    fn log_time_falls_back_on_garbage() {
        let fallback = Utc::now();
        assert_eq!(parse_log_time(Some("yesterday"), fallback), fallback);
        assert_eq!(parse_log_time(None, fallback), fallback);
    }
}

// Canonical records for every persisted table, plus the string-backed
// enums shared across the collector.
//
// Row structs derive `sqlx::FromRow` and map 1:1 onto their tables.
// Enum-valued columns are stored as text; the enums here round-trip
// through strum and are validated at the CRUD boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use sqlx::FromRow;
use strum::{Display, EnumString};
use uuid::Uuid;

// ── Shared enums ────────────────────────────────────────────────────

/// Alert / change-event severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

/// Threshold comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum CompareOp {
    #[strum(serialize = ">")]
    #[serde(rename = ">")]
    Gt,
    #[strum(serialize = "<")]
    #[serde(rename = "<")]
    Lt,
    #[strum(serialize = ">=")]
    #[serde(rename = ">=")]
    Ge,
    #[strum(serialize = "<=")]
    #[serde(rename = "<=")]
    Le,
    #[strum(serialize = "==")]
    #[serde(rename = "==")]
    Eq,
    #[strum(serialize = "!=")]
    #[serde(rename = "!=")]
    Ne,
}

/// Scan aggressiveness profile.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, Default,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScanProfile {
    Quick,
    #[default]
    Balanced,
    Thorough,
}

/// Scan target selector type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Tag,
    Location,
    Ip,
    All,
}

/// Scan queue item lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

/// Detected difference between two successive scans of the same target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    NewPort,
    PortClosed,
    OsChange,
    ServiceVersionChange,
}

/// Maintenance window recurrence rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    Once,
    Daily,
    Weekly,
}

/// Series resolution for range queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Raw,
    Hourly,
    Daily,
}

/// Log table kind, used for the bounded per-device rolling windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Threat,
    Url,
    System,
    Traffic,
}

impl LogKind {
    pub fn table(self) -> &'static str {
        match self {
            Self::Threat => "threat_logs",
            Self::Url => "url_filtering_logs",
            Self::System => "system_logs",
            Self::Traffic => "traffic_logs",
        }
    }
}

// ── Throughput samples ──────────────────────────────────────────────

/// One row of the `throughput_samples` hypertable: the full dashboard
/// snapshot collected in a single polling tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct ThroughputSample {
    pub time: DateTime<Utc>,
    pub device_id: Uuid,

    // Raw counters at collection time (monotonic modulo reset).
    pub ibytes: i64,
    pub obytes: i64,
    pub ipackets: i64,
    pub opackets: i64,

    // Derived rates.
    pub inbound_mbps: f64,
    pub outbound_mbps: f64,
    pub total_mbps: f64,
    pub inbound_pps: f64,
    pub outbound_pps: f64,
    pub total_pps: f64,

    // Sessions.
    pub sessions_active: Option<i64>,
    pub sessions_tcp: Option<i64>,
    pub sessions_udp: Option<i64>,
    pub sessions_icmp: Option<i64>,
    pub sessions_max: Option<i64>,

    // Resources.
    pub cpu_data_plane: Option<f64>,
    pub cpu_mgmt_plane: Option<f64>,
    pub memory_used_pct: Option<f64>,
    pub uptime_seconds: Option<i64>,

    // Threat counters with per-level last-seen.
    pub critical_threats: i64,
    pub high_threats: i64,
    pub medium_threats: i64,
    pub blocked_urls: i64,
    pub critical_last_seen: Option<String>,
    pub high_last_seen: Option<String>,
    pub medium_last_seen: Option<String>,
    pub blocked_url_last_seen: Option<String>,

    // Interfaces.
    pub interface_errors: Option<i64>,
    pub interface_drops: Option<i64>,

    // License.
    pub license_expired: Option<i64>,
    pub license_licensed: Option<i64>,

    // WAN / identity.
    pub wan_ip: Option<String>,
    pub wan_speed: Option<String>,
    pub hostname: Option<String>,
    pub os_version: Option<String>,

    // JSON blobs: top applications, per-interface stats, category split,
    // top clients split by internal/internet traffic.
    pub top_apps: Option<Json>,
    pub interface_stats: Option<Json>,
    pub top_category_lan: Option<Json>,
    pub top_category_internet: Option<Json>,
    pub top_internal_client: Option<Json>,
    pub top_internet_client: Option<Json>,
}

/// Aggregated point returned by hourly/daily range queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct SamplePoint {
    pub bucket: DateTime<Utc>,
    pub inbound_mbps: Option<f64>,
    pub outbound_mbps: Option<f64>,
    pub total_mbps: Option<f64>,
    pub inbound_pps: Option<f64>,
    pub outbound_pps: Option<f64>,
    pub total_pps: Option<f64>,
    pub sessions_active: Option<f64>,
    pub cpu_data_plane: Option<f64>,
    pub cpu_mgmt_plane: Option<f64>,
    pub memory_used_pct: Option<f64>,
}

// ── Connected devices ───────────────────────────────────────────────

/// One row of the `connected_devices` hypertable: a device seen on the
/// network at a collection instant, with denormalized metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct ConnectedDeviceRow {
    pub time: DateTime<Utc>,
    pub device_id: Uuid,
    pub mac: String,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub vlan: Option<String>,
    pub interface: Option<String>,
    pub zone: Option<String>,
    pub vendor: Option<String>,
    pub is_virtual: bool,
    pub is_randomized: bool,
    pub virtual_reason: Option<String>,
    pub custom_name: Option<String>,
    pub comment: Option<String>,
    pub location: Option<String>,
    pub tags: Option<Json>,
}

/// Per-IP traffic volume over a window, used by the bandwidth alert and
/// the enriched connected-devices view.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IpBandwidth {
    pub ip: String,
    pub direction: String,
    pub total_bytes: i64,
    pub hostname: Option<String>,
}

// ── Logs ────────────────────────────────────────────────────────────

/// One row of any of the four log hypertables. Unused columns stay None
/// for kinds that do not carry them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct LogRow {
    pub time: DateTime<Utc>,
    pub device_id: Uuid,
    pub severity: Option<String>,
    pub name: Option<String>,
    pub source_ip: Option<String>,
    pub dest_ip: Option<String>,
    pub app: Option<String>,
    pub action: Option<String>,
    pub category: Option<String>,
    pub rule: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub bytes_sent: Option<i64>,
    pub bytes_received: Option<i64>,
    pub details: Option<Json>,
}

// ── Applications ────────────────────────────────────────────────────

/// One row of the `application_samples` hypertable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct ApplicationSampleRow {
    pub time: DateTime<Utc>,
    pub device_id: Uuid,
    pub app_name: String,
    pub category: Option<String>,
    pub sessions: i64,
    pub bytes_total: i64,
    pub bytes_sent: i64,
    pub bytes_received: i64,
    pub protocols: Option<Json>,
    pub ports: Option<Json>,
    pub vlans: Option<Json>,
    pub zones: Option<Json>,
    /// Source endpoints, capped at the top 50 by bytes.
    pub sources: Option<Json>,
    /// Destination endpoints, capped at the top 50 by bytes.
    pub destinations: Option<Json>,
}

/// Roll-up served by the read adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationSummary {
    pub unique_apps: i64,
    pub unique_vlans: i64,
    pub unique_zones: i64,
    pub total_bytes: i64,
}

// ── Alerts ──────────────────────────────────────────────────────────

/// One alert configuration.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AlertConfigRow {
    pub id: i64,
    pub device_id: Uuid,
    /// Open string: scalar metric names plus `app_<name>` and
    /// `per_ip_bandwidth_5min`.
    pub metric_type: String,
    pub threshold_value: f64,
    pub threshold_operator: String,
    pub severity: String,
    pub enabled: bool,
    /// JSON array of notification channel ids.
    pub notification_channels: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Explicit partial update for an alert configuration. Unknown fields are
/// rejected at the API boundary; absent fields stay untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConfigUpdate {
    pub metric_type: Option<String>,
    pub threshold_value: Option<f64>,
    pub threshold_operator: Option<CompareOp>,
    pub severity: Option<Severity>,
    pub enabled: Option<bool>,
    pub notification_channels: Option<Vec<i64>>,
}

impl AlertConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.metric_type.is_none()
            && self.threshold_value.is_none()
            && self.threshold_operator.is_none()
            && self.severity.is_none()
            && self.enabled.is_none()
            && self.notification_channels.is_none()
    }
}

/// One row of the `alert_history` hypertable.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AlertHistoryRow {
    pub id: i64,
    pub time: DateTime<Utc>,
    pub alert_config_id: i64,
    pub device_id: Uuid,
    pub metric_type: String,
    pub threshold_value: f64,
    pub actual_value: f64,
    pub severity: String,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_reason: Option<String>,
}

/// Cooldown record for one `(device, config)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AlertCooldownRow {
    pub device_id: Uuid,
    pub alert_config_id: i64,
    pub cooldown_until: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Maintenance window during which alert evaluation is suppressed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MaintenanceWindowRow {
    pub id: i64,
    /// None = global (all devices).
    pub device_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub recurrence: String,
    pub enabled: bool,
}

/// Severity roll-up served by the read adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertStats {
    pub total_configs: i64,
    pub enabled_configs: i64,
    pub total_alerts: i64,
    pub unresolved_alerts: i64,
    pub critical_alerts: i64,
    pub warning_alerts: i64,
    pub info_alerts: i64,
    pub acknowledged_alerts: i64,
}

// ── Scans ───────────────────────────────────────────────────────────

/// One open/closed port observed by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPort {
    pub port: u16,
    pub protocol: String,
    pub state: String,
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
}

/// One OS fingerprint candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsMatch {
    pub name: String,
    pub accuracy: Option<i32>,
}

/// One row of the `scan_results` hypertable.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScanResultRow {
    pub id: i64,
    pub time: DateTime<Utc>,
    pub device_id: Uuid,
    pub target_ip: String,
    pub scan_profile: String,
    pub duration_seconds: Option<f64>,
    pub hostname: Option<String>,
    pub host_status: Option<String>,
    pub os_name: Option<String>,
    pub os_accuracy: Option<i32>,
    /// Full OS match list.
    pub os_matches: Option<Json>,
    pub total_ports: i32,
    pub open_ports_count: i32,
    /// Parsed port list (`Vec<ScanPort>` as JSON).
    pub ports: Json,
    /// Full parsed detail blob.
    pub detail: Option<Json>,
    pub raw_output: Option<String>,
}

/// One row of the `scan_change_events` hypertable.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScanChangeEventRow {
    pub id: i64,
    pub time: DateTime<Utc>,
    pub device_id: Uuid,
    pub target_ip: String,
    pub change_type: String,
    pub severity: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub details: Option<Json>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
}

/// One scheduled scan definition.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScheduledScanRow {
    pub id: i64,
    pub device_id: Uuid,
    pub name: String,
    pub target_type: String,
    pub target_value: Option<String>,
    pub scan_profile: String,
    /// `interval` / `daily` / `weekly` / `cron`.
    pub schedule_type: String,
    /// Interval seconds, `HH:MM`, `dow:HH:MM`, or a cron expression.
    pub schedule_value: String,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<String>,
    pub last_run_error: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One scan queue item.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScanQueueRow {
    pub id: i64,
    pub schedule_id: Option<i64>,
    pub device_id: Uuid,
    pub target_ip: String,
    pub scan_profile: String,
    pub status: String,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub scan_result_id: Option<i64>,
    pub error_message: Option<String>,
}

// ── Scheduler stats ─────────────────────────────────────────────────

/// One row of the `scheduler_stats` hypertable: a periodic self-report of
/// scheduler health.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SchedulerStatsRow {
    pub time: DateTime<Utc>,
    pub state: String,
    pub total_executions: i64,
    pub total_errors: i64,
    pub uptime_seconds: i64,
    /// Per-job last/next run map.
    pub jobs: Json,
    /// Recent execution history entries.
    pub recent_executions: Json,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn severity_round_trips_through_strings() {
        for s in [Severity::Critical, Severity::Warning, Severity::Info] {
            assert_eq!(Severity::from_str(&s.to_string()).unwrap(), s);
        }
        assert!(Severity::from_str("fatal").is_err());
    }

    #[test]
    fn compare_op_symbols() {
        assert_eq!(CompareOp::Gt.to_string(), ">");
        assert_eq!(CompareOp::from_str("<=").unwrap(), CompareOp::Le);
        assert!(CompareOp::from_str("=>").is_err());
    }

    #[test]
    fn change_type_snake_case() {
        assert_eq!(ChangeType::NewPort.to_string(), "new_port");
        assert_eq!(
            ChangeType::from_str("service_version_change").unwrap(),
            ChangeType::ServiceVersionChange
        );
    }

    #[test]
    fn scan_profile_default_is_balanced() {
        assert_eq!(ScanProfile::default(), ScanProfile::Balanced);
    }

    #[test]
    fn update_emptiness() {
        assert!(AlertConfigUpdate::default().is_empty());
        let upd = AlertConfigUpdate {
            enabled: Some(false),
            ..AlertConfigUpdate::default()
        };
        assert!(!upd.is_empty());
    }
}

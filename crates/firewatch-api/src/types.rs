// Typed responses for each management-API operation.
//
// Every field the wire does not guarantee is an Option; the normalization
// layer in `xml.rs` never invents values. Consumers (the polling pipeline)
// decide how to default.

use serde::{Deserialize, Serialize};

/// `show system info` — identity and uptime of the firewall.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemInfo {
    pub hostname: Option<String>,
    pub uptime_seconds: Option<i64>,
    /// Running OS version string (e.g. "11.1.2-h3").
    pub sw_version: Option<String>,
    pub serial: Option<String>,
    pub model: Option<String>,
}

/// Byte/packet/error counters for a single interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceCounters {
    pub name: String,
    pub ibytes: u64,
    pub obytes: u64,
    pub ipackets: u64,
    pub opackets: u64,
    pub ierrors: u64,
    pub idrops: u64,
}

/// `show session info` — session table occupancy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionInfo {
    pub active: Option<i64>,
    pub tcp: Option<i64>,
    pub udp: Option<i64>,
    pub icmp: Option<i64>,
    pub max: Option<i64>,
}

/// CPU and memory utilization, combined from the resource-monitor
/// (data plane) and `show system resources` (management plane) operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceUtilization {
    pub data_plane_cpu: Option<f64>,
    pub mgmt_plane_cpu: Option<f64>,
    pub memory_used_pct: Option<f64>,
}

/// `show interface <wan>` — address and negotiated speed of the WAN uplink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WanStatus {
    pub ip: Option<String>,
    pub speed: Option<String>,
}

/// One row of `show arp all`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArpEntry {
    pub ip: String,
    pub mac: String,
    pub interface: Option<String>,
    pub zone: Option<String>,
    pub status: Option<String>,
}

/// One row of `show dhcp server lease`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhcpLease {
    pub ip: String,
    pub mac: String,
    pub hostname: Option<String>,
    pub state: Option<String>,
}

/// One threat log entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreatLogEntry {
    pub time: Option<String>,
    pub threat_name: Option<String>,
    pub severity: Option<String>,
    pub source_ip: Option<String>,
    pub dest_ip: Option<String>,
    pub app: Option<String>,
    pub action: Option<String>,
    pub category: Option<String>,
    pub rule: Option<String>,
}

/// One URL filtering log entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlLogEntry {
    pub time: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
    pub source_ip: Option<String>,
    pub dest_ip: Option<String>,
    pub action: Option<String>,
}

/// One system log entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemLogEntry {
    pub time: Option<String>,
    pub severity: Option<String>,
    pub event_id: Option<String>,
    pub description: Option<String>,
}

/// One traffic log entry. Source/destination byte counts feed the
/// per-IP bandwidth aggregation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrafficLogEntry {
    pub time: Option<String>,
    pub source_ip: Option<String>,
    pub dest_ip: Option<String>,
    pub app: Option<String>,
    pub action: Option<String>,
    pub bytes_sent: Option<i64>,
    pub bytes_received: Option<i64>,
    pub session_end_reason: Option<String>,
}

/// `request license info` — expired vs valid license counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LicenseInfo {
    pub expired: i64,
    pub licensed: i64,
}

/// Per-endpoint byte count inside an application statistics entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointBytes {
    pub ip: String,
    pub bytes: u64,
}

/// Aggregated statistics for one application.
///
/// Source/destination lists are capped upstream (top 50 by bytes);
/// the client passes through whatever the firewall reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppStatistics {
    pub name: String,
    pub category: Option<String>,
    pub sessions: i64,
    pub bytes: i64,
    pub bytes_sent: i64,
    pub bytes_received: i64,
    pub protocols: Vec<String>,
    pub ports: Vec<i64>,
    pub vlans: Vec<String>,
    pub zones: Vec<String>,
    pub sources: Vec<EndpointBytes>,
    pub destinations: Vec<EndpointBytes>,
}

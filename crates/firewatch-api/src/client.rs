// Hand-crafted async HTTP client for the firewall XML management API.
//
// All operations go through GET /api/ with `type`, `cmd` (or log/report
// parameters) and the API key. The key is injected per request and never
// logged.

use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;
use crate::types::{
    AppStatistics, ArpEntry, DhcpLease, InterfaceCounters, LicenseInfo, ResourceUtilization,
    SessionInfo, SystemInfo, SystemLogEntry, ThreatLogEntry, TrafficLogEntry, UrlLogEntry,
    WanStatus,
};
use crate::xml;

/// Per-call timeout for operations with large result sets (license,
/// software, report queries).
const LONG_OP_TIMEOUT: Duration = Duration::from_secs(60);

/// A parsed operation result together with the measured round-trip latency.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub latency: Duration,
}

impl<T> Fetched<T> {
    fn new(value: T, latency: Duration) -> Self {
        Self { value, latency }
    }
}

/// Async client for one firewall's XML management API.
pub struct FirewallClient {
    http: reqwest::Client,
    endpoint: Url,
    api_key: SecretString,
}

impl std::fmt::Debug for FirewallClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirewallClient")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl FirewallClient {
    /// Build a client for the management address (e.g. `"192.168.1.1"` or a
    /// full `https://…` URL). The `/api/` endpoint suffix is appended.
    pub fn new(
        address: &str,
        api_key: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let raw = if address.contains("://") {
            address.to_owned()
        } else {
            format!("https://{address}")
        };
        let mut endpoint = Url::parse(&raw)?;
        let path = endpoint.path().trim_end_matches('/').to_owned();
        endpoint.set_path(&format!("{path}/api/"));

        Ok(Self {
            http: transport.build_client()?,
            endpoint,
            api_key,
        })
    }

    /// Wrap an existing `reqwest::Client` (used by tests).
    pub fn with_client(http: reqwest::Client, endpoint: Url, api_key: SecretString) -> Self {
        Self {
            http,
            endpoint,
            api_key,
        }
    }

    // ── Raw exchange ─────────────────────────────────────────────────

    async fn exchange(
        &self,
        params: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<(String, Duration), Error> {
        debug!(endpoint = %self.endpoint, op = ?params.first(), "firewall API request");

        let mut request = self
            .http
            .get(self.endpoint.clone())
            .query(params)
            .query(&[("key", self.api_key.expose_secret())]);
        if let Some(t) = timeout {
            request = request.timeout(t);
        }

        let started = Instant::now();
        let resp = request.send().await?;
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Authentication {
                message: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message: if message.is_empty() {
                    status.to_string()
                } else {
                    message
                },
            });
        }

        let body = resp.text().await?;
        Ok((body, started.elapsed()))
    }

    async fn op(&self, cmd: &str, timeout: Option<Duration>) -> Result<(String, Duration), Error> {
        self.exchange(&[("type", "op"), ("cmd", cmd)], timeout).await
    }

    async fn log_query(&self, log_type: &str, nlogs: u32) -> Result<(String, Duration), Error> {
        let nlogs = nlogs.to_string();
        self.exchange(
            &[
                ("type", "log"),
                ("log-type", log_type),
                ("nlogs", nlogs.as_str()),
            ],
            Some(LONG_OP_TIMEOUT),
        )
        .await
    }

    // ── Operations ───────────────────────────────────────────────────

    /// `show system info` — hostname, uptime, OS version.
    pub async fn system_info(&self) -> Result<Fetched<SystemInfo>, Error> {
        let (body, latency) = self
            .op("<show><system><info></info></system></show>", None)
            .await?;
        Ok(Fetched::new(xml::parse_system_info(&body)?, latency))
    }

    /// `show counter interface <name>` — byte/packet counters for the
    /// monitored interface. This is the core fetch of a throughput tick.
    pub async fn interface_counters(
        &self,
        interface: &str,
    ) -> Result<Fetched<InterfaceCounters>, Error> {
        let cmd = format!("<show><counter><interface>{interface}</interface></counter></show>");
        let (body, latency) = self.op(&cmd, None).await?;
        Ok(Fetched::new(
            xml::parse_interface_counters(&body, interface)?,
            latency,
        ))
    }

    /// `show counter interface all` — counters for every interface,
    /// used for error/drop totals and the per-interface stats blob.
    pub async fn all_interface_counters(&self) -> Result<Fetched<Vec<InterfaceCounters>>, Error> {
        let (body, latency) = self
            .op("<show><counter><interface>all</interface></counter></show>", None)
            .await?;
        Ok(Fetched::new(xml::parse_all_interface_counters(&body)?, latency))
    }

    /// `show session info` — session table occupancy.
    pub async fn session_info(&self) -> Result<Fetched<SessionInfo>, Error> {
        let (body, latency) = self
            .op("<show><session><info></info></session></show>", None)
            .await?;
        Ok(Fetched::new(xml::parse_session_info(&body)?, latency))
    }

    /// Data-plane resource monitor + `show system resources`, combined into
    /// one utilization record. Either half may be absent.
    pub async fn resource_utilization(&self) -> Result<Fetched<ResourceUtilization>, Error> {
        let started = Instant::now();

        let (monitor, resources) = tokio::join!(
            self.op(
                "<show><running><resource-monitor><minute><last>1</last></minute></resource-monitor></running></show>",
                None,
            ),
            self.op("<show><system><resources></resources></system></show>", None),
        );

        // Either half may fail on its own; the other still populates the
        // record. Absent halves surface as None, not as an error.
        let data_plane_cpu = match monitor.and_then(|(body, _)| xml::parse_resource_monitor(&body))
        {
            Ok(cpu) => cpu,
            Err(e) => {
                debug!(error = %e, "data-plane resource monitor unavailable");
                None
            }
        };
        let (mgmt_plane_cpu, memory_used_pct) =
            match resources.and_then(|(body, _)| xml::parse_system_resources(&body)) {
                Ok(pair) => pair,
                Err(e) => {
                    debug!(error = %e, "system resources unavailable");
                    (None, None)
                }
            };

        Ok(Fetched::new(
            ResourceUtilization {
                data_plane_cpu,
                mgmt_plane_cpu,
                memory_used_pct,
            },
            started.elapsed(),
        ))
    }

    /// `show interface <wan>` — WAN address and negotiated speed.
    pub async fn wan_status(&self, interface: &str) -> Result<Fetched<WanStatus>, Error> {
        let cmd = format!("<show><interface>{interface}</interface></show>");
        let (body, latency) = self.op(&cmd, None).await?;
        Ok(Fetched::new(xml::parse_wan_status(&body)?, latency))
    }

    /// `show arp all` — the connected-device ground truth.
    pub async fn arp_table(&self) -> Result<Fetched<Vec<ArpEntry>>, Error> {
        let (body, latency) = self
            .op("<show><arp><entry name = 'all'/></arp></show>", None)
            .await?;
        Ok(Fetched::new(xml::parse_arp_table(&body)?, latency))
    }

    /// `show dhcp server lease` — hostnames for ARP entries.
    pub async fn dhcp_leases(&self) -> Result<Fetched<Vec<DhcpLease>>, Error> {
        let (body, latency) = self
            .op(
                "<show><dhcp><server><lease><interface>all</interface></lease></server></dhcp></show>",
                None,
            )
            .await?;
        Ok(Fetched::new(xml::parse_dhcp_leases(&body)?, latency))
    }

    /// Threat log query, newest first.
    pub async fn threat_logs(&self, nlogs: u32) -> Result<Fetched<Vec<ThreatLogEntry>>, Error> {
        let (body, latency) = self.log_query("threat", nlogs).await?;
        Ok(Fetched::new(xml::parse_threat_logs(&body)?, latency))
    }

    /// URL filtering log query, newest first.
    pub async fn url_filtering_logs(&self, nlogs: u32) -> Result<Fetched<Vec<UrlLogEntry>>, Error> {
        let (body, latency) = self.log_query("url", nlogs).await?;
        Ok(Fetched::new(xml::parse_url_logs(&body)?, latency))
    }

    /// System log query, newest first.
    pub async fn system_logs(&self, nlogs: u32) -> Result<Fetched<Vec<SystemLogEntry>>, Error> {
        let (body, latency) = self.log_query("system", nlogs).await?;
        Ok(Fetched::new(xml::parse_system_logs(&body)?, latency))
    }

    /// Traffic log query, newest first. Feeds per-IP bandwidth aggregation.
    pub async fn traffic_logs(&self, nlogs: u32) -> Result<Fetched<Vec<TrafficLogEntry>>, Error> {
        let (body, latency) = self.log_query("traffic", nlogs).await?;
        Ok(Fetched::new(xml::parse_traffic_logs(&body)?, latency))
    }

    /// `request license info` — expired/valid license counts.
    pub async fn license_info(&self) -> Result<Fetched<LicenseInfo>, Error> {
        let (body, latency) = self
            .op(
                "<request><license><info></info></license></request>",
                Some(LONG_OP_TIMEOUT),
            )
            .await?;
        Ok(Fetched::new(xml::parse_license_info(&body)?, latency))
    }

    /// Application statistics report: per-application traffic with
    /// source/destination endpoint lists.
    pub async fn application_statistics(&self) -> Result<Fetched<Vec<AppStatistics>>, Error> {
        let (body, latency) = self
            .exchange(
                &[
                    ("type", "report"),
                    ("reporttype", "predefined"),
                    ("reportname", "application-statistics"),
                ],
                Some(LONG_OP_TIMEOUT),
            )
            .await?;
        Ok(Fetched::new(xml::parse_app_statistics(&body)?, latency))
    }
}

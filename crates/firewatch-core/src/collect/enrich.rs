// Connected-device enrichment: virtual/randomized MAC classification,
// vendor lookup, reverse DNS, and the internal-vs-internet traffic split
// used for the top-client and top-category sample fields.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use serde::{Deserialize, Serialize};
use tracing::debug;

use firewatch_api::types::AppStatistics;

// ── Virtual / randomized MAC classification ─────────────────────────

/// Classification of a MAC address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacClass {
    pub is_virtual: bool,
    pub is_randomized: bool,
    pub reason: Option<String>,
}

/// Known virtualization OUI prefixes (bare hex, uppercase).
const VIRTUAL_PREFIXES: &[(&str, &str)] = &[
    ("005056", "VMware"),
    ("000C29", "VMware"),
    ("000569", "VMware"),
    ("00155D", "Microsoft Hyper-V"),
    ("0242", "Docker"),
    ("080027", "VirtualBox"),
    ("00163E", "Xen"),
    ("DEADBE", "Test/Virtual"),
    ("525400", "QEMU/KVM"),
];

/// Vendor families whose locally-administered MACs indicate OS-level
/// address randomization rather than a hypervisor.
const MOBILE_VENDOR_OS: &[(&str, &str)] = &[
    ("Apple", "Apple device with randomized MAC (Privacy)"),
    ("Samsung", "Android device with randomized MAC (Privacy)"),
    ("Google", "Android device with randomized MAC (Privacy)"),
    ("Xiaomi", "Android device with randomized MAC (Privacy)"),
    ("OnePlus", "Android device with randomized MAC (Privacy)"),
    ("Microsoft", "Windows device with randomized MAC (Privacy)"),
];

/// Classify a MAC as virtual/randomized.
///
/// Known hypervisor prefixes win; otherwise a set locally-administered bit
/// (2nd bit of the first octet) marks the address as randomized, attributed
/// to a mobile OS family when the vendor hints at one.
pub fn classify_mac(mac: &str, vendor: Option<&str>) -> MacClass {
    let clean: String = mac
        .chars()
        .filter(char::is_ascii_hexdigit)
        .collect::<String>()
        .to_uppercase();
    if clean.len() < 2 {
        return MacClass::default();
    }

    for (prefix, family) in VIRTUAL_PREFIXES {
        if clean.starts_with(prefix) {
            return MacClass {
                is_virtual: true,
                is_randomized: false,
                reason: Some(format!("{family} virtual MAC")),
            };
        }
    }

    let Ok(first_octet) = u8::from_str_radix(&clean[..2], 16) else {
        return MacClass::default();
    };
    if first_octet & 0x02 != 0 {
        let reason = vendor
            .and_then(|v| {
                MOBILE_VENDOR_OS
                    .iter()
                    .find(|(family, _)| v.contains(family))
                    .map(|(_, reason)| (*reason).to_owned())
            })
            .unwrap_or_else(|| "Randomised MAC address".to_owned());
        return MacClass {
            is_virtual: true,
            is_randomized: true,
            reason: Some(reason),
        };
    }

    MacClass::default()
}

// ── Vendor lookup ───────────────────────────────────────────────────

/// OUI prefix -> vendor name. The database itself is external; this is
/// the pure lookup the pipeline consumes.
pub trait VendorLookup: Send + Sync {
    fn vendor_for(&self, mac: &str) -> Option<String>;
}

/// Map-backed vendor database keyed by the first six hex digits.
#[derive(Debug, Default)]
pub struct StaticVendorDb {
    by_prefix: HashMap<String, String>,
}

impl StaticVendorDb {
    pub fn new(by_prefix: HashMap<String, String>) -> Self {
        Self {
            by_prefix: by_prefix
                .into_iter()
                .map(|(k, v)| (k.to_uppercase(), v))
                .collect(),
        }
    }

    /// Load from a JSON object file of `{"AABBCC": "Vendor"}` entries.
    pub fn load(path: &std::path::Path) -> std::io::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let by_prefix: HashMap<String, String> = serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self::new(by_prefix))
    }
}

impl VendorLookup for StaticVendorDb {
    fn vendor_for(&self, mac: &str) -> Option<String> {
        let clean: String = mac
            .chars()
            .filter(char::is_ascii_hexdigit)
            .collect::<String>()
            .to_uppercase();
        if clean.len() < 6 {
            return None;
        }
        self.by_prefix.get(&clean[..6]).cloned()
    }
}

// ── Reverse DNS ─────────────────────────────────────────────────────

/// Reverse resolver with a hard per-lookup timeout. Only consulted for
/// entries the DHCP lease table could not name.
pub struct RdnsResolver {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl std::fmt::Debug for RdnsResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdnsResolver").finish_non_exhaustive()
    }
}

impl RdnsResolver {
    /// Build with explicit nameservers, or the system defaults when the
    /// list is empty.
    pub fn new(nameservers: &[String]) -> Self {
        let ips: Vec<IpAddr> = nameservers.iter().filter_map(|s| s.parse().ok()).collect();
        let config = if ips.is_empty() {
            ResolverConfig::default()
        } else {
            ResolverConfig::from_parts(
                None,
                Vec::new(),
                NameServerConfigGroup::from_ips_clear(&ips, 53, true),
            )
        };
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(2);

        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
            timeout: Duration::from_secs(2),
        }
    }

    /// PTR lookup; None on timeout or any failure (the caller falls back
    /// to the IP string).
    pub async fn lookup(&self, ip: IpAddr) -> Option<String> {
        let fut = self.resolver.reverse_lookup(ip);
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(names)) => names
                .iter()
                .next()
                .map(|name| name.to_utf8().trim_end_matches('.').to_owned()),
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "reverse DNS lookup failed");
                None
            }
            Err(_) => {
                debug!(ip = %ip, "reverse DNS lookup timed out");
                None
            }
        }
    }
}

pub type SharedVendorDb = Arc<dyn VendorLookup>;

// ── Internal vs internet traffic split ──────────────────────────────

/// RFC1918 private space.
pub fn is_rfc1918(ip: Ipv4Addr) -> bool {
    ip.is_private()
}

/// Internal for traffic-classification purposes: private, loopback, or
/// link-local.
pub fn is_internal_ip(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback(),
        Err(_) => false,
    }
}

/// Top-client summary attached to a throughput sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopClient {
    pub ip: String,
    pub bytes: u64,
}

/// Top-category summary attached to a throughput sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopCategory {
    pub category: String,
    pub bytes: i64,
    pub sessions: i64,
    pub bytes_sent: i64,
    pub bytes_received: i64,
}

/// Split of the "top" figures into internal-only and internet-bound
/// views, computed from application-statistics endpoint lists.
#[derive(Debug, Clone, Default)]
pub struct TrafficSplit {
    pub top_internal_client: Option<TopClient>,
    pub top_internet_client: Option<TopClient>,
    pub top_category_lan: Option<TopCategory>,
    pub top_category_internet: Option<TopCategory>,
}

/// Category name the firewall uses for LAN-internal traffic.
const PRIVATE_CATEGORY: &str = "private-ip-addresses";

/// Derive the traffic split from one application-statistics report.
///
/// Clients are bucketed by scanning each application's source list:
/// a private source talking within an application whose destinations are
/// all private counts as internal; a private source in an application
/// with any public destination counts as internet-bound.
pub fn traffic_split(apps: &[AppStatistics]) -> TrafficSplit {
    let mut internal: HashMap<String, u64> = HashMap::new();
    let mut internet: HashMap<String, u64> = HashMap::new();

    for app in apps {
        let has_public_dest = app.destinations.iter().any(|d| !is_internal_ip(&d.ip));
        let bucket = if has_public_dest {
            &mut internet
        } else {
            &mut internal
        };
        for src in &app.sources {
            if is_internal_ip(&src.ip) {
                *bucket.entry(src.ip.clone()).or_default() += src.bytes;
            }
        }
    }

    let top_of = |bucket: &HashMap<String, u64>| {
        bucket
            .iter()
            .max_by_key(|(_, bytes)| **bytes)
            .map(|(ip, bytes)| TopClient {
                ip: ip.clone(),
                bytes: *bytes,
            })
    };

    // Category split: private-ip-addresses is the LAN view; the top of
    // everything else is the internet view.
    let mut categories: HashMap<String, TopCategory> = HashMap::new();
    for app in apps {
        let Some(name) = app.category.as_deref() else {
            continue;
        };
        let entry = categories.entry(name.to_owned()).or_insert_with(|| TopCategory {
            category: name.to_owned(),
            ..TopCategory::default()
        });
        entry.bytes += app.bytes;
        entry.sessions += app.sessions;
        entry.bytes_sent += app.bytes_sent;
        entry.bytes_received += app.bytes_received;
    }

    let top_category_lan = categories.get(PRIVATE_CATEGORY).cloned();
    let top_category_internet = categories
        .values()
        .filter(|c| c.category != PRIVATE_CATEGORY)
        .max_by_key(|c| c.bytes)
        .cloned();

    TrafficSplit {
        top_internal_client: top_of(&internal),
        top_internet_client: top_of(&internet),
        top_category_lan,
        top_category_internet,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use firewatch_api::types::EndpointBytes;
    use pretty_assertions::assert_eq;

    // ── MAC classification ──

    #[test]
    fn vmware_prefix_is_virtual_not_randomized() {
        let class = classify_mac("00:50:56:aa:bb:cc", None);
        assert!(class.is_virtual);
        assert!(!class.is_randomized);
        assert_eq!(class.reason.as_deref(), Some("VMware virtual MAC"));
    }

    #[test]
    fn docker_short_prefix_matches() {
        let class = classify_mac("02:42:ac:11:00:02", None);
        assert!(class.is_virtual);
        assert_eq!(class.reason.as_deref(), Some("Docker virtual MAC"));
    }

    #[test]
    fn locally_administered_apple_is_randomized() {
        // 0xDA has the locally-administered bit set.
        let class = classify_mac("da:a1:19:aa:bb:cc", Some("Apple, Inc."));
        assert!(class.is_randomized);
        assert_eq!(
            class.reason.as_deref(),
            Some("Apple device with randomized MAC (Privacy)")
        );
    }

    #[test]
    fn locally_administered_unknown_vendor_is_generic_randomized() {
        let class = classify_mac("da:a1:19:aa:bb:cc", None);
        assert!(class.is_randomized);
        assert_eq!(class.reason.as_deref(), Some("Randomised MAC address"));
    }

    #[test]
    fn globally_administered_mac_is_plain() {
        let class = classify_mac("3c:22:fb:aa:bb:cc", Some("Apple, Inc."));
        assert_eq!(class, MacClass::default());
    }

    // ── Vendor lookup ──

    #[test]
    fn vendor_lookup_by_prefix() {
        let db = StaticVendorDb::new(HashMap::from([(
            "3C22FB".to_owned(),
            "Apple, Inc.".to_owned(),
        )]));
        assert_eq!(
            db.vendor_for("3c:22:fb:01:02:03").as_deref(),
            Some("Apple, Inc.")
        );
        assert!(db.vendor_for("ff:ff:ff:01:02:03").is_none());
    }

    // ── Traffic split ──

    fn app(
        name: &str,
        category: &str,
        bytes: i64,
        sources: Vec<(&str, u64)>,
        destinations: Vec<&str>,
    ) -> AppStatistics {
        AppStatistics {
            name: name.into(),
            category: Some(category.into()),
            bytes,
            sources: sources
                .into_iter()
                .map(|(ip, b)| EndpointBytes {
                    ip: ip.into(),
                    bytes: b,
                })
                .collect(),
            destinations: destinations
                .into_iter()
                .map(|ip| EndpointBytes {
                    ip: ip.into(),
                    bytes: 0,
                })
                .collect(),
            ..AppStatistics::default()
        }
    }

    #[test]
    fn split_buckets_clients_by_destination_locality() {
        let apps = vec![
            app(
                "smb",
                "private-ip-addresses",
                5_000,
                vec![("192.168.1.10", 4_000), ("192.168.1.20", 1_000)],
                vec!["192.168.1.5"],
            ),
            app(
                "ssl",
                "networking",
                9_000,
                vec![("192.168.1.30", 9_000)],
                vec!["1.1.1.1"],
            ),
        ];

        let split = traffic_split(&apps);
        assert_eq!(split.top_internal_client.unwrap().ip, "192.168.1.10");
        assert_eq!(split.top_internet_client.unwrap().ip, "192.168.1.30");
    }

    #[test]
    fn category_split_separates_lan_from_internet() {
        let apps = vec![
            app("smb", "private-ip-addresses", 5_000, vec![], vec![]),
            app("ssl", "networking", 9_000, vec![], vec![]),
            app("dns", "networking", 1_000, vec![], vec![]),
            app("netflix", "streaming", 7_000, vec![], vec![]),
        ];

        let split = traffic_split(&apps);
        assert_eq!(split.top_category_lan.unwrap().category, "private-ip-addresses");
        let internet = split.top_category_internet.unwrap();
        assert_eq!(internet.category, "networking");
        assert_eq!(internet.bytes, 10_000);
    }

    #[test]
    fn empty_report_yields_empty_split() {
        let split = traffic_split(&[]);
        assert!(split.top_internal_client.is_none());
        assert!(split.top_category_internet.is_none());
    }

    // ── IP classification ──

    #[test]
    fn internal_ip_classification() {
        assert!(is_internal_ip("10.1.2.3"));
        assert!(is_internal_ip("172.20.0.1"));
        assert!(is_internal_ip("192.168.1.1"));
        assert!(is_internal_ip("127.0.0.1"));
        assert!(is_internal_ip("169.254.10.10"));
        assert!(!is_internal_ip("8.8.8.8"));
        assert!(!is_internal_ip("not-an-ip"));
    }
}

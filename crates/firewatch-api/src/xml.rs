// Normalization layer: firewall XML replies -> typed responses.
//
// Parsers are total over malformed input: a missing field becomes None (or
// is skipped for list entries); only an unparseable document or an
// `status="error"` envelope produces an Error.

use roxmltree::{Document, Node};

use crate::error::Error;
use crate::types::{
    AppStatistics, ArpEntry, DhcpLease, EndpointBytes, InterfaceCounters, LicenseInfo,
    ResourceUtilization, SessionInfo, SystemInfo, SystemLogEntry, ThreatLogEntry, TrafficLogEntry,
    UrlLogEntry, WanStatus,
};

/// Parse the reply envelope, surfacing `status="error"` as an error.
pub(crate) fn parse_envelope(body: &str) -> Result<Document<'_>, Error> {
    let doc = Document::parse(body).map_err(|e| Error::Parse {
        message: format!("invalid XML: {e}"),
    })?;

    let root = doc.root_element();
    if root.has_tag_name("response") && root.attribute("status") == Some("error") {
        let message = descendant_text(root, "msg")
            .or_else(|| descendant_text(root, "line"))
            .unwrap_or("unspecified error")
            .to_owned();
        return Err(Error::Operation { message });
    }

    Ok(doc)
}

// ── Node helpers ────────────────────────────────────────────────────

fn descendant<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.descendants().find(|n| n.has_tag_name(name))
}

fn descendant_text<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    descendant(node, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn child_u64(node: Node<'_, '_>, name: &str) -> Option<u64> {
    child_text(node, name).and_then(|s| s.parse().ok())
}

fn child_i64(node: Node<'_, '_>, name: &str) -> Option<i64> {
    child_text(node, name).and_then(|s| s.parse().ok())
}

fn entries<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.descendants().filter(|n| n.has_tag_name("entry"))
}

// ── System info ─────────────────────────────────────────────────────

/// Parse an uptime string of the form `"5 days, 12:34:56"` (the day part
/// is absent below 24 hours) into seconds.
pub(crate) fn parse_uptime(raw: &str) -> Option<i64> {
    let (days, clock) = match raw.split_once(',') {
        Some((day_part, rest)) => {
            let days: i64 = day_part.split_whitespace().next()?.parse().ok()?;
            (days, rest.trim())
        }
        None => (0, raw.trim()),
    };

    let mut parts = clock.split(':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    Some(days * 86_400 + hours * 3_600 + minutes * 60 + seconds)
}

pub(crate) fn parse_system_info(body: &str) -> Result<SystemInfo, Error> {
    let doc = parse_envelope(body)?;
    let root = doc.root_element();

    Ok(SystemInfo {
        hostname: descendant_text(root, "hostname").map(str::to_owned),
        uptime_seconds: descendant_text(root, "uptime").and_then(parse_uptime),
        sw_version: descendant_text(root, "sw-version").map(str::to_owned),
        serial: descendant_text(root, "serial").map(str::to_owned),
        model: descendant_text(root, "model").map(str::to_owned),
    })
}

// ── Interface counters ──────────────────────────────────────────────

fn counters_from_entry(entry: Node<'_, '_>, name: &str) -> InterfaceCounters {
    InterfaceCounters {
        name: name.to_owned(),
        ibytes: child_u64(entry, "ibytes").unwrap_or(0),
        obytes: child_u64(entry, "obytes").unwrap_or(0),
        ipackets: child_u64(entry, "ipackets").unwrap_or(0),
        opackets: child_u64(entry, "opackets").unwrap_or(0),
        ierrors: child_u64(entry, "ierrors").unwrap_or(0),
        idrops: child_u64(entry, "idrops").unwrap_or(0),
    }
}

/// Extract counters for a single named interface from
/// `show counter interface <name>`.
pub(crate) fn parse_interface_counters(body: &str, name: &str) -> Result<InterfaceCounters, Error> {
    let doc = parse_envelope(body)?;
    let root = doc.root_element();

    let entry = entries(root)
        .find(|e| child_text(*e, "name") == Some(name))
        .ok_or_else(|| Error::Parse {
            message: format!("interface {name} not present in counter reply"),
        })?;

    Ok(counters_from_entry(entry, name))
}

/// Extract counters for every interface from `show counter interface all`.
pub(crate) fn parse_all_interface_counters(body: &str) -> Result<Vec<InterfaceCounters>, Error> {
    let doc = parse_envelope(body)?;
    let root = doc.root_element();

    Ok(entries(root)
        .filter_map(|e| child_text(e, "name").map(|name| counters_from_entry(e, name)))
        .collect())
}

// ── Session info ────────────────────────────────────────────────────

pub(crate) fn parse_session_info(body: &str) -> Result<SessionInfo, Error> {
    let doc = parse_envelope(body)?;
    let root = doc.root_element();

    Ok(SessionInfo {
        active: descendant_text(root, "num-active").and_then(|s| s.parse().ok()),
        tcp: descendant_text(root, "num-tcp").and_then(|s| s.parse().ok()),
        udp: descendant_text(root, "num-udp").and_then(|s| s.parse().ok()),
        icmp: descendant_text(root, "num-icmp").and_then(|s| s.parse().ok()),
        max: descendant_text(root, "num-max").and_then(|s| s.parse().ok()),
    })
}

// ── Resources ───────────────────────────────────────────────────────

/// Average the most recent per-core load figures from the data-plane
/// resource monitor reply.
pub(crate) fn parse_resource_monitor(body: &str) -> Result<Option<f64>, Error> {
    let doc = parse_envelope(body)?;
    let root = doc.root_element();

    let Some(load_avg) = descendant(root, "cpu-load-average") else {
        return Ok(None);
    };

    let values: Vec<f64> = entries(load_avg)
        .filter_map(|e| {
            // Each core entry carries a comma-separated value series,
            // newest first.
            child_text(e, "value")
                .and_then(|s| s.split(',').next())
                .and_then(|s| s.trim().parse().ok())
        })
        .collect();

    if values.is_empty() {
        return Ok(None);
    }
    #[allow(clippy::cast_precision_loss)]
    Ok(Some(values.iter().sum::<f64>() / values.len() as f64))
}

/// Pull management-plane CPU and memory usage out of the top-style text
/// block returned by `show system resources`.
pub(crate) fn parse_system_resources(body: &str) -> Result<(Option<f64>, Option<f64>), Error> {
    let doc = parse_envelope(body)?;
    let root = doc.root_element();
    let Some(text) = descendant_text(root, "result") else {
        return Ok((None, None));
    };

    let mut cpu = None;
    let mut mem = None;

    for line in text.lines() {
        let line = line.trim();
        if line.starts_with("%Cpu(s):") || line.starts_with("Cpu(s):") {
            // "%Cpu(s):  7.1 us,  2.3 sy, ..." — user + system time.
            let mut total = 0.0;
            let mut seen = false;
            for field in line.split(',') {
                let field = field.trim();
                if let Some(v) = field
                    .strip_suffix("us")
                    .or_else(|| field.strip_suffix("sy"))
                    .and_then(|v| v.split_whitespace().last())
                    .and_then(|v| v.parse::<f64>().ok())
                {
                    total += v;
                    seen = true;
                }
            }
            if seen {
                cpu = Some(total);
            }
        } else if line.contains("Mem") && line.contains("total") {
            // "MiB Mem :  16008.2 total,   1234.5 free,   8123.0 used, ..."
            let mut total_kb = None;
            let mut used_kb = None;
            for field in line.split(',') {
                let field = field.trim();
                let mut words = field.split_whitespace().rev();
                let label = words.next();
                let value = words.next().and_then(|v| v.parse::<f64>().ok());
                match (label, value) {
                    (Some("total"), Some(v)) => total_kb = Some(v),
                    (Some("used"), Some(v)) => used_kb = Some(v),
                    _ => {}
                }
            }
            if let (Some(total), Some(used)) = (total_kb, used_kb) {
                if total > 0.0 {
                    mem = Some(used / total * 100.0);
                }
            }
        }
    }

    Ok((cpu, mem))
}

// ── WAN interface ───────────────────────────────────────────────────

pub(crate) fn parse_wan_status(body: &str) -> Result<WanStatus, Error> {
    let doc = parse_envelope(body)?;
    let root = doc.root_element();

    // Dynamic addresses (DHCP/PPPoE) live under dyn-addr and carry a CIDR
    // suffix; static addresses are a bare <ip> element.
    let ip = descendant(root, "dyn-addr")
        .and_then(|n| descendant_text(n, "member"))
        .or_else(|| descendant_text(root, "ip"))
        .map(|raw| raw.split('/').next().unwrap_or(raw).to_owned());

    let speed = descendant_text(root, "speed").map(|raw| {
        if raw.chars().all(|c| c.is_ascii_digit()) {
            format!("{raw} Mbps")
        } else {
            raw.to_owned()
        }
    });

    Ok(WanStatus { ip, speed })
}

// ── ARP / DHCP ──────────────────────────────────────────────────────

pub(crate) fn parse_arp_table(body: &str) -> Result<Vec<ArpEntry>, Error> {
    let doc = parse_envelope(body)?;
    let root = doc.root_element();

    Ok(entries(root)
        .filter_map(|e| {
            let ip = child_text(e, "ip")?;
            let mac = child_text(e, "mac")?;
            // Incomplete ARP entries report a placeholder MAC.
            if mac.eq_ignore_ascii_case("(incomplete)") {
                return None;
            }
            Some(ArpEntry {
                ip: ip.to_owned(),
                mac: mac.to_owned(),
                interface: child_text(e, "interface").map(str::to_owned),
                zone: child_text(e, "zone").map(str::to_owned),
                status: child_text(e, "status").map(str::to_owned),
            })
        })
        .collect())
}

pub(crate) fn parse_dhcp_leases(body: &str) -> Result<Vec<DhcpLease>, Error> {
    let doc = parse_envelope(body)?;
    let root = doc.root_element();

    Ok(entries(root)
        .filter_map(|e| {
            let ip = child_text(e, "ip")?;
            let mac = child_text(e, "mac")?;
            Some(DhcpLease {
                ip: ip.to_owned(),
                mac: mac.to_owned(),
                hostname: child_text(e, "hostname")
                    .filter(|h| !h.eq_ignore_ascii_case("unknown"))
                    .map(str::to_owned),
                state: child_text(e, "state").map(str::to_owned),
            })
        })
        .collect())
}

// ── Logs ────────────────────────────────────────────────────────────

pub(crate) fn parse_threat_logs(body: &str) -> Result<Vec<ThreatLogEntry>, Error> {
    let doc = parse_envelope(body)?;
    let root = doc.root_element();

    Ok(entries(root)
        .map(|e| ThreatLogEntry {
            time: child_text(e, "receive_time").map(str::to_owned),
            threat_name: child_text(e, "threatid").map(str::to_owned),
            severity: child_text(e, "severity").map(str::to_owned),
            source_ip: child_text(e, "src").map(str::to_owned),
            dest_ip: child_text(e, "dst").map(str::to_owned),
            app: child_text(e, "app").map(str::to_owned),
            action: child_text(e, "action").map(str::to_owned),
            category: child_text(e, "category").map(str::to_owned),
            rule: child_text(e, "rule").map(str::to_owned),
        })
        .collect())
}

pub(crate) fn parse_url_logs(body: &str) -> Result<Vec<UrlLogEntry>, Error> {
    let doc = parse_envelope(body)?;
    let root = doc.root_element();

    Ok(entries(root)
        .map(|e| UrlLogEntry {
            time: child_text(e, "receive_time").map(str::to_owned),
            url: child_text(e, "misc").map(str::to_owned),
            category: child_text(e, "category").map(str::to_owned),
            source_ip: child_text(e, "src").map(str::to_owned),
            dest_ip: child_text(e, "dst").map(str::to_owned),
            action: child_text(e, "action").map(str::to_owned),
        })
        .collect())
}

pub(crate) fn parse_system_logs(body: &str) -> Result<Vec<SystemLogEntry>, Error> {
    let doc = parse_envelope(body)?;
    let root = doc.root_element();

    Ok(entries(root)
        .map(|e| SystemLogEntry {
            time: child_text(e, "receive_time").map(str::to_owned),
            severity: child_text(e, "severity").map(str::to_owned),
            event_id: child_text(e, "eventid").map(str::to_owned),
            description: child_text(e, "opaque").map(str::to_owned),
        })
        .collect())
}

pub(crate) fn parse_traffic_logs(body: &str) -> Result<Vec<TrafficLogEntry>, Error> {
    let doc = parse_envelope(body)?;
    let root = doc.root_element();

    Ok(entries(root)
        .map(|e| TrafficLogEntry {
            time: child_text(e, "receive_time").map(str::to_owned),
            source_ip: child_text(e, "src").map(str::to_owned),
            dest_ip: child_text(e, "dst").map(str::to_owned),
            app: child_text(e, "app").map(str::to_owned),
            action: child_text(e, "action").map(str::to_owned),
            bytes_sent: child_i64(e, "bytes_sent"),
            bytes_received: child_i64(e, "bytes_received"),
            session_end_reason: child_text(e, "session_end_reason").map(str::to_owned),
        })
        .collect())
}

// ── License ─────────────────────────────────────────────────────────

pub(crate) fn parse_license_info(body: &str) -> Result<LicenseInfo, Error> {
    let doc = parse_envelope(body)?;
    let root = doc.root_element();

    let mut info = LicenseInfo::default();
    for entry in entries(root) {
        match child_text(entry, "expired") {
            Some("yes") => info.expired += 1,
            Some(_) => info.licensed += 1,
            None => {}
        }
    }
    Ok(info)
}

// ── Application statistics ──────────────────────────────────────────

fn endpoint_list(node: Node<'_, '_>, name: &str) -> Vec<EndpointBytes> {
    descendant(node, name)
        .map(|list| {
            list.children()
                .filter(|n| n.has_tag_name("entry"))
                .filter_map(|e| {
                    Some(EndpointBytes {
                        ip: child_text(e, "ip")?.to_owned(),
                        bytes: child_u64(e, "bytes").unwrap_or(0),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn member_list(node: Node<'_, '_>, name: &str) -> Vec<String> {
    descendant(node, name)
        .map(|list| {
            list.children()
                .filter(|n| n.has_tag_name("member"))
                .filter_map(|n| n.text())
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn parse_app_statistics(body: &str) -> Result<Vec<AppStatistics>, Error> {
    let doc = parse_envelope(body)?;
    let root = doc.root_element();

    Ok(entries(root)
        .filter(|e| e.parent().is_some_and(|p| p.has_tag_name("report")))
        .filter_map(|e| {
            let name = child_text(e, "name")?;
            Some(AppStatistics {
                name: name.to_owned(),
                category: child_text(e, "category").map(str::to_owned),
                sessions: child_i64(e, "sessions").unwrap_or(0),
                bytes: child_i64(e, "bytes").unwrap_or(0),
                bytes_sent: child_i64(e, "bytes_sent").unwrap_or(0),
                bytes_received: child_i64(e, "bytes_received").unwrap_or(0),
                protocols: member_list(e, "protocols"),
                ports: member_list(e, "ports")
                    .into_iter()
                    .filter_map(|p| p.parse().ok())
                    .collect(),
                vlans: member_list(e, "vlans"),
                zones: member_list(e, "zones"),
                sources: endpoint_list(e, "sources"),
                destinations: endpoint_list(e, "destinations"),
            })
        })
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn uptime_with_days() {
        assert_eq!(parse_uptime("5 days, 12:34:56"), Some(5 * 86_400 + 45_296));
    }

    #[test]
    fn uptime_without_days() {
        assert_eq!(parse_uptime("02:00:30"), Some(7_230));
    }

    #[test]
    fn uptime_garbage_is_none() {
        assert_eq!(parse_uptime("forever"), None);
    }

    #[test]
    fn envelope_error_status_is_surfaced() {
        let body = r#"<response status="error"><msg><line>Invalid credential</line></msg></response>"#;
        let err = parse_envelope(body).unwrap_err();
        assert!(matches!(err, Error::Operation { .. }));
    }

    #[test]
    fn interface_counters_select_named_entry() {
        let body = r#"<response status="success"><result><ifnet>
            <entry><name>ethernet1/1</name><ibytes>100</ibytes><obytes>50</obytes><ipackets>10</ipackets><opackets>5</opackets></entry>
            <entry><name>ethernet1/12</name><ibytes>1000</ibytes><obytes>500</obytes><ipackets>100</ipackets><opackets>50</opackets><ierrors>2</ierrors><idrops>3</idrops></entry>
        </ifnet></result></response>"#;

        let c = parse_interface_counters(body, "ethernet1/12").unwrap();
        assert_eq!(c.ibytes, 1000);
        assert_eq!(c.obytes, 500);
        assert_eq!(c.ierrors, 2);
        assert_eq!(c.idrops, 3);
    }

    #[test]
    fn interface_counters_missing_interface_is_parse_error() {
        let body = r#"<response status="success"><result><ifnet></ifnet></result></response>"#;
        let err = parse_interface_counters(body, "ethernet1/12").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn session_info_fields() {
        let body = r#"<response status="success"><result>
            <num-active>1234</num-active><num-tcp>1000</num-tcp>
            <num-udp>200</num-udp><num-icmp>34</num-icmp><num-max>262144</num-max>
        </result></response>"#;

        let s = parse_session_info(body).unwrap();
        assert_eq!(s.active, Some(1234));
        assert_eq!(s.max, Some(262_144));
    }

    #[test]
    fn wan_status_strips_cidr_from_dynamic_address() {
        let body = r#"<response status="success"><result><ifnet><entry>
            <dyn-addr><member>87.121.248.146/22</member></dyn-addr>
            <speed>1000</speed>
        </entry></ifnet></result></response>"#;

        let wan = parse_wan_status(body).unwrap();
        assert_eq!(wan.ip.as_deref(), Some("87.121.248.146"));
        assert_eq!(wan.speed.as_deref(), Some("1000 Mbps"));
    }

    #[test]
    fn arp_skips_incomplete_entries() {
        let body = r#"<response status="success"><result><entries>
            <entry><ip>192.168.1.10</ip><mac>aa:bb:cc:dd:ee:ff</mac><interface>ethernet1/2</interface></entry>
            <entry><ip>192.168.1.99</ip><mac>(incomplete)</mac></entry>
        </entries></result></response>"#;

        let arp = parse_arp_table(body).unwrap();
        assert_eq!(arp.len(), 1);
        assert_eq!(arp[0].ip, "192.168.1.10");
    }

    #[test]
    fn dhcp_lease_unknown_hostname_is_none() {
        let body = r#"<response status="success"><result><entry>
            <ip>192.168.1.10</ip><mac>aa:bb:cc:dd:ee:ff</mac><hostname>unknown</hostname>
        </entry></result></response>"#;

        let leases = parse_dhcp_leases(body).unwrap();
        assert_eq!(leases.len(), 1);
        assert!(leases[0].hostname.is_none());
    }

    #[test]
    fn license_counts_split_by_expiry() {
        let body = r#"<response status="success"><result><licenses>
            <entry><feature>Threat Prevention</feature><expired>no</expired></entry>
            <entry><feature>URL Filtering</feature><expired>yes</expired></entry>
            <entry><feature>WildFire</feature><expired>no</expired></entry>
        </licenses></result></response>"#;

        let lic = parse_license_info(body).unwrap();
        assert_eq!(lic.licensed, 2);
        assert_eq!(lic.expired, 1);
    }

    #[test]
    fn app_statistics_with_endpoints() {
        let body = r#"<response status="success"><result><report>
            <entry>
                <name>ssl</name><category>networking</category>
                <sessions>42</sessions><bytes>1000</bytes>
                <bytes_sent>400</bytes_sent><bytes_received>600</bytes_received>
                <sources><entry><ip>192.168.1.10</ip><bytes>700</bytes></entry></sources>
                <destinations><entry><ip>1.1.1.1</ip><bytes>700</bytes></entry></destinations>
                <ports><member>443</member></ports>
            </entry>
        </report></result></response>"#;

        let apps = parse_app_statistics(body).unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].name, "ssl");
        assert_eq!(apps[0].sources[0].ip, "192.168.1.10");
        assert_eq!(apps[0].ports, vec![443]);
    }

    #[test]
    fn resource_monitor_averages_cores() {
        let body = r#"<response status="success"><result><resource-monitor>
            <data-processors><dp0><minute><cpu-load-average>
                <entry><coreid>0</coreid><value>30,20,10</value></entry>
                <entry><coreid>1</coreid><value>50,40,30</value></entry>
            </cpu-load-average></minute></dp0></data-processors>
        </resource-monitor></result></response>"#;

        let cpu = parse_resource_monitor(body).unwrap();
        assert_eq!(cpu, Some(40.0));
    }

    #[test]
    fn system_resources_top_output() {
        let body = r#"<response status="success"><result>top - 12:00:00 up 5 days
%Cpu(s):  7.1 us,  2.3 sy,  0.0 ni, 90.0 id
MiB Mem :  16000.0 total,   4000.0 free,   8000.0 used,   4000.0 buff/cache
</result></response>"#;

        let (cpu, mem) = parse_system_resources(body).unwrap();
        assert!((cpu.unwrap() - 9.4).abs() < 0.01);
        assert!((mem.unwrap() - 50.0).abs() < 0.01);
    }
}

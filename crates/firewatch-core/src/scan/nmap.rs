// nmap execution and XML output parsing.

use std::net::Ipv4Addr;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::model::{OsMatch, ScanPort, ScanProfile};
use crate::CoreError;

use super::profile::{profile_args, profile_timeout};

/// Parsed scan output for one host.
#[derive(Debug, Clone, Default)]
pub struct ParsedScan {
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub host_status: Option<String>,
    pub os_matches: Vec<OsMatch>,
    pub ports: Vec<ScanPort>,
    pub duration_seconds: Option<f64>,
}

impl ParsedScan {
    /// Best OS candidate, by reported accuracy.
    pub fn best_os(&self) -> Option<&OsMatch> {
        self.os_matches
            .iter()
            .max_by_key(|m| m.accuracy.unwrap_or(0))
    }

    pub fn open_ports(&self) -> impl Iterator<Item = &ScanPort> {
        self.ports.iter().filter(|p| p.state == "open")
    }
}

/// Check that nmap is installed, returning its version banner.
pub async fn nmap_available() -> Result<String, CoreError> {
    let output = Command::new("nmap")
        .arg("--version")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| CoreError::Scan(format!("nmap not available: {e}")))?;

    if !output.status.success() {
        return Err(CoreError::Scan(format!(
            "nmap version check failed (exit {:?})",
            output.status.code()
        )));
    }
    let banner = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or("unknown version")
        .to_owned();
    Ok(banner)
}

/// Execute one scan against a pre-validated RFC1918 target.
///
/// The argument list is passed to the process directly (no shell). The
/// subprocess is killed when the profile timeout elapses.
pub async fn run_scan(
    target: Ipv4Addr,
    profile: ScanProfile,
) -> Result<(ParsedScan, String), CoreError> {
    let timeout = profile_timeout(profile);
    info!(target = %target, profile = %profile, timeout_secs = timeout.as_secs(), "starting scan");

    let child = Command::new("nmap")
        .args(profile_args(profile))
        .args(["-oX", "-"])
        .arg(target.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CoreError::Scan(format!("failed to spawn nmap: {e}")))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(CoreError::Scan(format!("nmap execution failed: {e}"))),
        Err(_) => {
            // kill_on_drop reaps the child when the future is dropped here.
            return Err(CoreError::Scan(format!(
                "scan of {target} timed out after {}s",
                timeout.as_secs()
            )));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(target = %target, exit = ?output.status.code(), "nmap exited nonzero");
        return Err(CoreError::Scan(format!(
            "nmap failed (exit {:?}): {}",
            output.status.code(),
            stderr.chars().take(500).collect::<String>()
        )));
    }

    let raw = String::from_utf8_lossy(&output.stdout).into_owned();
    let parsed = parse_nmap_xml(&raw)?;
    info!(
        target = %target,
        open_ports = parsed.open_ports().count(),
        os_matches = parsed.os_matches.len(),
        "scan complete"
    );
    Ok((parsed, raw))
}

/// Parse nmap XML output for a single-host scan.
pub fn parse_nmap_xml(xml: &str) -> Result<ParsedScan, CoreError> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| CoreError::Scan(format!("unparseable nmap XML: {e}")))?;
    let root = doc.root_element();

    let mut result = ParsedScan {
        duration_seconds: root
            .descendants()
            .find(|n| n.has_tag_name("finished"))
            .and_then(|n| n.attribute("elapsed"))
            .and_then(|s| s.parse().ok()),
        ..ParsedScan::default()
    };

    let Some(host) = root.children().find(|n| n.has_tag_name("host")) else {
        debug!("no host element in nmap output (host down?)");
        return Ok(result);
    };

    result.ip = host
        .children()
        .find(|n| n.has_tag_name("address"))
        .and_then(|n| n.attribute("addr"))
        .map(str::to_owned);
    result.hostname = host
        .descendants()
        .find(|n| n.has_tag_name("hostname"))
        .and_then(|n| n.attribute("name"))
        .map(str::to_owned);
    result.host_status = host
        .children()
        .find(|n| n.has_tag_name("status"))
        .and_then(|n| n.attribute("state"))
        .map(str::to_owned);

    if let Some(os) = host.children().find(|n| n.has_tag_name("os")) {
        result.os_matches = os
            .children()
            .filter(|n| n.has_tag_name("osmatch"))
            .filter_map(|m| {
                Some(OsMatch {
                    name: m.attribute("name")?.to_owned(),
                    accuracy: m.attribute("accuracy").and_then(|a| a.parse().ok()),
                })
            })
            .collect();
    }

    if let Some(ports) = host.children().find(|n| n.has_tag_name("ports")) {
        result.ports = ports
            .children()
            .filter(|n| n.has_tag_name("port"))
            .filter_map(|p| {
                let service = p.children().find(|n| n.has_tag_name("service"));
                Some(ScanPort {
                    port: p.attribute("portid")?.parse().ok()?,
                    protocol: p.attribute("protocol").unwrap_or("tcp").to_owned(),
                    state: p
                        .children()
                        .find(|n| n.has_tag_name("state"))
                        .and_then(|s| s.attribute("state"))
                        .unwrap_or("unknown")
                        .to_owned(),
                    service: service.and_then(|s| s.attribute("name")).map(str::to_owned),
                    product: service
                        .and_then(|s| s.attribute("product"))
                        .map(str::to_owned),
                    version: service
                        .and_then(|s| s.attribute("version"))
                        .map(str::to_owned),
                })
            })
            .collect();
    }

    Ok(result)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<nmaprun scanner="nmap" start="1753000000">
  <host>
    <status state="up" reason="user-set"/>
    <address addr="192.168.1.50" addrtype="ipv4"/>
    <hostnames><hostname name="printer.lan" type="PTR"/></hostnames>
    <ports>
      <port protocol="tcp" portid="22">
        <state state="open" reason="syn-ack"/>
        <service name="ssh" product="OpenSSH" version="9.6"/>
      </port>
      <port protocol="tcp" portid="80">
        <state state="open" reason="syn-ack"/>
        <service name="http" product="nginx" version="1.24.0"/>
      </port>
      <port protocol="tcp" portid="23">
        <state state="closed" reason="reset"/>
        <service name="telnet"/>
      </port>
    </ports>
    <os>
      <osmatch name="Linux 5.4 - 6.1" accuracy="96"/>
      <osmatch name="Linux 4.15" accuracy="90"/>
    </os>
  </host>
  <runstats><finished time="1753000042" elapsed="42.35"/></runstats>
</nmaprun>"#;

    #[test]
    fn parses_host_fields() {
        let scan = parse_nmap_xml(SAMPLE).unwrap();
        assert_eq!(scan.ip.as_deref(), Some("192.168.1.50"));
        assert_eq!(scan.hostname.as_deref(), Some("printer.lan"));
        assert_eq!(scan.host_status.as_deref(), Some("up"));
        assert_eq!(scan.duration_seconds, Some(42.35));
    }

    #[test]
    fn parses_ports_with_service_details() {
        let scan = parse_nmap_xml(SAMPLE).unwrap();
        assert_eq!(scan.ports.len(), 3);
        assert_eq!(scan.open_ports().count(), 2);

        let ssh = scan.ports.iter().find(|p| p.port == 22).unwrap();
        assert_eq!(ssh.service.as_deref(), Some("ssh"));
        assert_eq!(ssh.product.as_deref(), Some("OpenSSH"));
        assert_eq!(ssh.version.as_deref(), Some("9.6"));
    }

    #[test]
    fn best_os_picks_highest_accuracy() {
        let scan = parse_nmap_xml(SAMPLE).unwrap();
        assert_eq!(scan.best_os().unwrap().name, "Linux 5.4 - 6.1");
    }

    #[test]
    fn host_down_yields_empty_result() {
        let xml = r#"<nmaprun scanner="nmap"><runstats><finished elapsed="1.0"/></runstats></nmaprun>"#;
        let scan = parse_nmap_xml(xml).unwrap();
        assert!(scan.ip.is_none());
        assert!(scan.ports.is_empty());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_nmap_xml("not xml at all <<<").is_err());
    }
}

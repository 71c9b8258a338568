// Change detection between two successive scans of the same target.

use serde_json::{Value as Json, json};

use crate::model::{ChangeType, ScanPort, Severity};

/// Ports whose appearance is treated as critical rather than a plain
/// warning, with the operator-facing risk description.
pub const HIGH_RISK_PORTS: &[(u16, &str)] = &[
    (21, "FTP (unencrypted)"),
    (23, "Telnet (unencrypted)"),
    (135, "RPC (Windows)"),
    (139, "NetBIOS (SMB)"),
    (445, "SMB/CIFS (Windows)"),
    (1433, "MSSQL"),
    (3306, "MySQL"),
    (3389, "RDP (Remote Desktop)"),
    (5432, "PostgreSQL"),
    (5900, "VNC"),
    (6379, "Redis"),
    (8080, "HTTP Proxy (often unsecured)"),
    (27017, "MongoDB"),
];

pub fn high_risk_description(port: u16) -> Option<&'static str> {
    HIGH_RISK_PORTS
        .iter()
        .find(|(p, _)| *p == port)
        .map(|(_, desc)| *desc)
}

/// The relevant slice of the previous scan.
#[derive(Debug, Clone, Default)]
pub struct PreviousScan {
    pub os_name: Option<String>,
    pub ports: Vec<ScanPort>,
}

/// One detected difference, ready for storage.
#[derive(Debug, Clone)]
pub struct Change {
    pub change_type: ChangeType,
    pub severity: Severity,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub details: Json,
}

fn port_label(port: &ScanPort) -> String {
    match &port.service {
        Some(service) => format!("{}/{} ({service})", port.port, port.protocol),
        None => format!("{}/{}", port.port, port.protocol),
    }
}

fn product_version(port: &ScanPort) -> String {
    format!(
        "{} {}",
        port.product.as_deref().unwrap_or(""),
        port.version.as_deref().unwrap_or("")
    )
    .trim()
    .to_owned()
}

/// Diff two successive scans.
///
/// - new open port: `critical` when high-risk, else `warning`
/// - previously open port gone: `info`
/// - distinct OS name: `warning`
/// - same port, distinct product/version: `info`
pub fn detect_changes(
    previous: &PreviousScan,
    current_os: Option<&str>,
    current_ports: &[ScanPort],
) -> Vec<Change> {
    let mut changes = Vec::new();

    let prev_by_port: std::collections::HashMap<u16, &ScanPort> =
        previous.ports.iter().map(|p| (p.port, p)).collect();
    let curr_by_port: std::collections::HashMap<u16, &ScanPort> =
        current_ports.iter().map(|p| (p.port, p)).collect();

    // New open ports.
    for (num, port) in &curr_by_port {
        if prev_by_port.contains_key(num) || port.state != "open" {
            continue;
        }
        let risk = high_risk_description(*num);
        let severity = if risk.is_some() {
            Severity::Critical
        } else {
            Severity::Warning
        };

        let mut details = json!({
            "port": num,
            "protocol": port.protocol,
            "service": port.service,
            "product": port.product,
            "version": port.version,
        });
        if let Some(desc) = risk {
            details["risk_description"] = json!(desc);
        }

        changes.push(Change {
            change_type: ChangeType::NewPort,
            severity,
            old_value: None,
            new_value: Some(port_label(port)),
            details,
        });
    }

    // Previously open ports now closed or absent.
    for (num, port) in &prev_by_port {
        if port.state != "open" {
            continue;
        }
        let still_open = curr_by_port.get(num).is_some_and(|p| p.state == "open");
        if still_open {
            continue;
        }
        changes.push(Change {
            change_type: ChangeType::PortClosed,
            severity: Severity::Info,
            old_value: Some(port_label(port)),
            new_value: Some("Closed".into()),
            details: json!({ "port": num, "protocol": port.protocol }),
        });
    }

    // OS change.
    if let (Some(old_os), Some(new_os)) = (previous.os_name.as_deref(), current_os) {
        if old_os != new_os {
            changes.push(Change {
                change_type: ChangeType::OsChange,
                severity: Severity::Warning,
                old_value: Some(old_os.to_owned()),
                new_value: Some(new_os.to_owned()),
                details: json!({ "old_os": old_os, "new_os": new_os }),
            });
        }
    }

    // Service version changes on ports present in both scans.
    for (num, current) in &curr_by_port {
        let Some(prev) = prev_by_port.get(num) else {
            continue;
        };
        let old_version = product_version(prev);
        let new_version = product_version(current);
        if !old_version.is_empty() && !new_version.is_empty() && old_version != new_version {
            changes.push(Change {
                change_type: ChangeType::ServiceVersionChange,
                severity: Severity::Info,
                old_value: Some(old_version.clone()),
                new_value: Some(new_version.clone()),
                details: json!({
                    "port": num,
                    "protocol": current.protocol,
                    "service": current.service,
                    "old_version": old_version,
                    "new_version": new_version,
                }),
            });
        }
    }

    changes
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn open_port(port: u16, service: &str) -> ScanPort {
        ScanPort {
            port,
            protocol: "tcp".into(),
            state: "open".into(),
            service: Some(service.into()),
            product: None,
            version: None,
        }
    }

    fn previous(ports: Vec<ScanPort>) -> PreviousScan {
        PreviousScan {
            os_name: None,
            ports,
        }
    }

    #[test]
    fn new_high_risk_port_is_critical_with_risk_description() {
        let prev = previous(vec![open_port(22, "ssh"), open_port(80, "http")]);
        let curr = vec![
            open_port(22, "ssh"),
            open_port(80, "http"),
            open_port(3389, "ms-wbt-server"),
        ];

        let changes = detect_changes(&prev, None, &curr);
        assert_eq!(changes.len(), 1);

        let change = &changes[0];
        assert_eq!(change.change_type, ChangeType::NewPort);
        assert_eq!(change.severity, Severity::Critical);
        assert_eq!(change.new_value.as_deref(), Some("3389/tcp (ms-wbt-server)"));
        assert_eq!(
            change.details["risk_description"],
            "RDP (Remote Desktop)"
        );
    }

    #[test]
    fn new_ordinary_port_is_warning() {
        let prev = previous(vec![open_port(22, "ssh")]);
        let curr = vec![open_port(22, "ssh"), open_port(8443, "https-alt")];

        let changes = detect_changes(&prev, None, &curr);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].severity, Severity::Warning);
    }

    #[test]
    fn closed_port_is_info() {
        let prev = previous(vec![open_port(22, "ssh"), open_port(80, "http")]);
        let curr = vec![open_port(22, "ssh")];

        let changes = detect_changes(&prev, None, &curr);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::PortClosed);
        assert_eq!(changes[0].severity, Severity::Info);
        assert_eq!(changes[0].old_value.as_deref(), Some("80/tcp (http)"));
    }

    #[test]
    fn identical_scans_produce_no_changes() {
        let ports = vec![open_port(22, "ssh"), open_port(80, "http")];
        let changes = detect_changes(&previous(ports.clone()), Some("Linux 5.4"), &ports);
        // OS in current but absent in previous is not a change.
        assert!(changes.is_empty());
    }

    #[test]
    fn os_change_is_warning() {
        let prev = PreviousScan {
            os_name: Some("Linux 5.4".into()),
            ports: vec![],
        };
        let changes = detect_changes(&prev, Some("Windows 10"), &[]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::OsChange);
        assert_eq!(changes[0].severity, Severity::Warning);
    }

    #[test]
    fn service_version_change_is_info() {
        let mut old = open_port(80, "http");
        old.product = Some("nginx".into());
        old.version = Some("1.24.0".into());
        let mut new = open_port(80, "http");
        new.product = Some("nginx".into());
        new.version = Some("1.26.1".into());

        let changes = detect_changes(&previous(vec![old]), None, &[new]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::ServiceVersionChange);
        assert_eq!(changes[0].old_value.as_deref(), Some("nginx 1.24.0"));
        assert_eq!(changes[0].new_value.as_deref(), Some("nginx 1.26.1"));
    }

    #[test]
    fn exactly_one_event_per_single_port_difference() {
        // Invariant: one port opening produces exactly one event; one
        // closing likewise.
        let prev = previous(vec![open_port(22, "ssh")]);
        let opened = detect_changes(&prev, None, &[open_port(22, "ssh"), open_port(445, "microsoft-ds")]);
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].severity, Severity::Critical);

        let closed = detect_changes(
            &previous(vec![open_port(22, "ssh"), open_port(445, "microsoft-ds")]),
            None,
            &[open_port(22, "ssh")],
        );
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].change_type, ChangeType::PortClosed);
    }
}

// Pure evaluation pieces: threshold comparison, maintenance-window
// matching, and metric-aware message formatting.

use chrono::{DateTime, Datelike, FixedOffset, Utc};

use crate::model::{CompareOp, IpBandwidth, MaintenanceWindowRow, Recurrence};

/// Tolerance for float equality in `==` / `!=` comparisons.
pub const EQ_TOLERANCE: f64 = 0.01;

/// `actual OP threshold`, with tolerant equality.
pub fn evaluate_threshold(actual: f64, threshold: f64, op: CompareOp) -> bool {
    match op {
        CompareOp::Gt => actual > threshold,
        CompareOp::Lt => actual < threshold,
        CompareOp::Ge => actual >= threshold,
        CompareOp::Le => actual <= threshold,
        CompareOp::Eq => (actual - threshold).abs() <= EQ_TOLERANCE,
        CompareOp::Ne => (actual - threshold).abs() > EQ_TOLERANCE,
    }
}

/// Whether a maintenance window covers `now` under its recurrence rule.
///
/// Wall-clock comparisons happen in the collector's configured offset.
/// Weekly windows match only the weekday of their start time.
pub fn window_matches(window: &MaintenanceWindowRow, now: DateTime<Utc>, offset: FixedOffset) -> bool {
    if !window.enabled {
        return false;
    }

    let Ok(recurrence) = window.recurrence.parse::<Recurrence>() else {
        return false;
    };

    let local_now = now.with_timezone(&offset);
    let start = window.start_time.with_timezone(&offset);
    let end = window.end_time.with_timezone(&offset);

    match recurrence {
        Recurrence::Once => window.start_time <= now && now <= window.end_time,
        Recurrence::Daily => {
            let t = local_now.time();
            start.time() <= t && t <= end.time()
        }
        Recurrence::Weekly => {
            if local_now.weekday() != start.weekday() {
                return false;
            }
            let t = local_now.time();
            start.time() <= t && t <= end.time()
        }
    }
}

/// Human-readable name for a metric type.
pub fn metric_display_name(metric_type: &str) -> String {
    match metric_type {
        "cpu" => "CPU Usage".to_owned(),
        "memory" => "Memory Usage".to_owned(),
        "sessions" => "Session Count".to_owned(),
        "threats_critical" => "Critical Threats".to_owned(),
        "interface_errors" => "Interface Errors".to_owned(),
        "throughput_in" => "Inbound Throughput".to_owned(),
        "throughput_out" => "Outbound Throughput".to_owned(),
        "throughput_total" => "Total Throughput".to_owned(),
        "per_ip_bandwidth_5min" => "Per-Client Bandwidth (5 min)".to_owned(),
        other => match other.strip_prefix("app_") {
            Some(app) => format!("Application {app}"),
            None => {
                // Fall back to title-cased words.
                other
                    .split('_')
                    .map(|w| {
                        let mut chars = w.chars();
                        match chars.next() {
                            Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                            None => String::new(),
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        },
    }
}

/// Format the alert message with metric-appropriate units. Per-IP alerts
/// enumerate the offending clients, one per line.
pub fn format_message(
    metric_type: &str,
    actual: f64,
    threshold: f64,
    op: CompareOp,
    per_ip: Option<&[IpBandwidth]>,
) -> String {
    let name = metric_display_name(metric_type);

    if metric_type == "per_ip_bandwidth_5min" {
        let mut lines = vec![format!(
            "{name}: {count} client(s) exceeded {threshold:.0} MB in the last 5 minutes:",
            count = actual as i64
        )];
        if let Some(offenders) = per_ip {
            for entry in offenders {
                let label = entry
                    .hostname
                    .as_deref()
                    .filter(|h| !h.is_empty())
                    .map_or_else(|| entry.ip.clone(), |h| format!("{} ({h})", entry.ip));
                let verb = if entry.direction == "upload" {
                    "uploaded"
                } else {
                    "downloaded"
                };
                lines.push(format!(
                    "{label} {verb} {mb:.0} MB",
                    mb = entry.total_bytes as f64 / 1_000_000.0
                ));
            }
        }
        return lines.join("\n");
    }

    match metric_type {
        "cpu" | "memory" => {
            format!("{name} is {actual:.1}% (threshold: {op} {threshold:.1}%)")
        }
        "sessions" => format!(
            "{name} is {} (threshold: {op} {})",
            actual as i64, threshold as i64
        ),
        "threats_critical" => format!(
            "{name}: {} threats detected (threshold: {op} {})",
            actual as i64, threshold as i64
        ),
        "interface_errors" => format!(
            "{name}: {} errors (threshold: {op} {})",
            actual as i64, threshold as i64
        ),
        "throughput_in" | "throughput_out" | "throughput_total" => {
            format!("{name} is {actual:.2} Mbps (threshold: {op} {threshold:.2} Mbps)")
        }
        m if m.starts_with("app_") => {
            format!("{name} moved {actual:.0} MB in the last 5 minutes (threshold: {op} {threshold:.0} MB)")
        }
        _ => format!("{name}: {actual} (threshold: {op} {threshold})"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};
    use uuid::Uuid;

    // ── Threshold evaluation ──

    #[test]
    fn comparisons_agree_with_math() {
        assert!(evaluate_threshold(95.0, 90.0, CompareOp::Gt));
        assert!(!evaluate_threshold(90.0, 90.0, CompareOp::Gt));
        assert!(evaluate_threshold(85.0, 90.0, CompareOp::Lt));
        assert!(evaluate_threshold(90.0, 90.0, CompareOp::Ge));
        assert!(evaluate_threshold(90.0, 90.0, CompareOp::Le));
        assert!(!evaluate_threshold(90.1, 90.0, CompareOp::Le));
    }

    #[test]
    fn equality_uses_tolerance() {
        assert!(evaluate_threshold(90.005, 90.0, CompareOp::Eq));
        assert!(!evaluate_threshold(90.02, 90.0, CompareOp::Eq));
        assert!(evaluate_threshold(90.02, 90.0, CompareOp::Ne));
        assert!(!evaluate_threshold(90.005, 90.0, CompareOp::Ne));
    }

    // ── Maintenance windows ──

    fn window(start: DateTime<Utc>, end: DateTime<Utc>, recurrence: &str) -> MaintenanceWindowRow {
        MaintenanceWindowRow {
            id: 1,
            device_id: Some(Uuid::new_v4()),
            start_time: start,
            end_time: end,
            recurrence: recurrence.into(),
            enabled: true,
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(y, mo, d)
                .unwrap()
                .and_hms_opt(h, mi, 0)
                .unwrap(),
        )
    }

    #[test]
    fn once_window_matches_inside_only() {
        let w = window(utc(2026, 3, 2, 2, 0), utc(2026, 3, 2, 3, 0), "once");
        let offset = FixedOffset::east_opt(0).unwrap();

        assert!(window_matches(&w, utc(2026, 3, 2, 2, 30), offset));
        assert!(!window_matches(&w, utc(2026, 3, 2, 3, 30), offset));
        assert!(!window_matches(&w, utc(2026, 3, 3, 2, 30), offset));
    }

    #[test]
    fn daily_window_matches_every_day() {
        let w = window(utc(2026, 1, 1, 2, 0), utc(2026, 1, 1, 3, 0), "daily");
        let offset = FixedOffset::east_opt(0).unwrap();

        assert!(window_matches(&w, utc(2026, 3, 2, 2, 30), offset));
        assert!(window_matches(&w, utc(2026, 6, 15, 2, 0), offset));
        assert!(!window_matches(&w, utc(2026, 3, 2, 4, 0), offset));
    }

    #[test]
    fn weekly_window_matches_start_weekday_only() {
        // 2026-01-05 is a Monday.
        let w = window(utc(2026, 1, 5, 2, 0), utc(2026, 1, 5, 3, 0), "weekly");
        let offset = FixedOffset::east_opt(0).unwrap();

        // 2026-03-02 is a Monday, 2026-03-03 a Tuesday.
        assert!(window_matches(&w, utc(2026, 3, 2, 2, 30), offset));
        assert!(!window_matches(&w, utc(2026, 3, 3, 2, 30), offset));
    }

    #[test]
    fn disabled_window_never_matches() {
        let mut w = window(
            Utc::now() - Duration::hours(1),
            Utc::now() + Duration::hours(1),
            "once",
        );
        w.enabled = false;
        assert!(!window_matches(&w, Utc::now(), FixedOffset::east_opt(0).unwrap()));
    }

    // ── Message formatting ──

    #[test]
    fn cpu_message_uses_percent() {
        let msg = format_message("cpu", 95.4, 90.0, CompareOp::Gt, None);
        assert_eq!(msg, "CPU Usage is 95.4% (threshold: > 90.0%)");
    }

    #[test]
    fn sessions_message_uses_integers() {
        let msg = format_message("sessions", 150_000.0, 100_000.0, CompareOp::Ge, None);
        assert_eq!(msg, "Session Count is 150000 (threshold: >= 100000)");
    }

    #[test]
    fn per_ip_message_enumerates_offenders() {
        let offenders = vec![IpBandwidth {
            ip: "192.168.1.10".into(),
            direction: "download".into(),
            total_bytes: 2_500_000_000,
            hostname: Some("johns-laptop".into()),
        }];
        let msg = format_message("per_ip_bandwidth_5min", 1.0, 1000.0, CompareOp::Gt, Some(&offenders));
        assert!(msg.contains("1 client(s) exceeded 1000 MB"));
        assert!(msg.contains("192.168.1.10 (johns-laptop) downloaded 2500 MB"));
    }

    #[test]
    fn app_message_uses_megabytes() {
        let msg = format_message("app_netflix", 512.0, 100.0, CompareOp::Gt, None);
        assert!(msg.starts_with("Application netflix moved 512 MB"));
    }
}

// Idempotent schema installer.
//
// Ordered DDL, each statement safe to re-run. Failure to create the
// TimescaleDB extension is fatal; every other error is recorded and
// logged but does not abort the pass, so a partially provisioned
// database converges over repeated runs.

use sqlx::PgPool;
use tracing::{info, warn};

use crate::StoreError;

/// Plain tables and hypertable sources. Every statement is `IF NOT EXISTS`.
const TABLES: &[&str] = &[
    // ── Throughput samples (hypertable) ──
    r"CREATE TABLE IF NOT EXISTS throughput_samples (
        time                   TIMESTAMPTZ NOT NULL,
        device_id              UUID NOT NULL,
        ibytes                 BIGINT NOT NULL DEFAULT 0,
        obytes                 BIGINT NOT NULL DEFAULT 0,
        ipackets               BIGINT NOT NULL DEFAULT 0,
        opackets               BIGINT NOT NULL DEFAULT 0,
        inbound_mbps           DOUBLE PRECISION NOT NULL DEFAULT 0,
        outbound_mbps          DOUBLE PRECISION NOT NULL DEFAULT 0,
        total_mbps             DOUBLE PRECISION NOT NULL DEFAULT 0,
        inbound_pps            DOUBLE PRECISION NOT NULL DEFAULT 0,
        outbound_pps           DOUBLE PRECISION NOT NULL DEFAULT 0,
        total_pps              DOUBLE PRECISION NOT NULL DEFAULT 0,
        sessions_active        BIGINT,
        sessions_tcp           BIGINT,
        sessions_udp           BIGINT,
        sessions_icmp          BIGINT,
        sessions_max           BIGINT,
        cpu_data_plane         DOUBLE PRECISION,
        cpu_mgmt_plane         DOUBLE PRECISION,
        memory_used_pct        DOUBLE PRECISION,
        uptime_seconds         BIGINT,
        critical_threats       BIGINT NOT NULL DEFAULT 0,
        high_threats           BIGINT NOT NULL DEFAULT 0,
        medium_threats         BIGINT NOT NULL DEFAULT 0,
        blocked_urls           BIGINT NOT NULL DEFAULT 0,
        critical_last_seen     TEXT,
        high_last_seen         TEXT,
        medium_last_seen       TEXT,
        blocked_url_last_seen  TEXT,
        interface_errors       BIGINT,
        interface_drops        BIGINT,
        license_expired        BIGINT,
        license_licensed       BIGINT,
        wan_ip                 TEXT,
        wan_speed              TEXT,
        hostname               TEXT,
        os_version             TEXT,
        top_apps               JSONB,
        interface_stats        JSONB,
        top_category_lan       JSONB,
        top_category_internet  JSONB,
        top_internal_client    JSONB,
        top_internet_client    JSONB,
        UNIQUE (device_id, time)
    )",

    // ── Connected devices (hypertable) ──
    r"CREATE TABLE IF NOT EXISTS connected_devices (
        time            TIMESTAMPTZ NOT NULL,
        device_id       UUID NOT NULL,
        mac             TEXT NOT NULL,
        ip              TEXT,
        hostname        TEXT,
        vlan            TEXT,
        interface       TEXT,
        zone            TEXT,
        vendor          TEXT,
        is_virtual      BOOLEAN NOT NULL DEFAULT FALSE,
        is_randomized   BOOLEAN NOT NULL DEFAULT FALSE,
        virtual_reason  TEXT,
        custom_name     TEXT,
        comment         TEXT,
        location        TEXT,
        tags            JSONB
    )",

    // ── Log windows (hypertables, bounded per device) ──
    r"CREATE TABLE IF NOT EXISTS threat_logs (
        id             BIGINT GENERATED BY DEFAULT AS IDENTITY,
        time           TIMESTAMPTZ NOT NULL,
        device_id      UUID NOT NULL,
        severity       TEXT,
        name           TEXT,
        source_ip      TEXT,
        dest_ip        TEXT,
        app            TEXT,
        action         TEXT,
        category       TEXT,
        rule           TEXT,
        url            TEXT,
        description    TEXT,
        bytes_sent     BIGINT,
        bytes_received BIGINT,
        details        JSONB
    )",
    r"CREATE TABLE IF NOT EXISTS url_filtering_logs (
        id             BIGINT GENERATED BY DEFAULT AS IDENTITY,
        time           TIMESTAMPTZ NOT NULL,
        device_id      UUID NOT NULL,
        severity       TEXT,
        name           TEXT,
        source_ip      TEXT,
        dest_ip        TEXT,
        app            TEXT,
        action         TEXT,
        category       TEXT,
        rule           TEXT,
        url            TEXT,
        description    TEXT,
        bytes_sent     BIGINT,
        bytes_received BIGINT,
        details        JSONB
    )",
    r"CREATE TABLE IF NOT EXISTS system_logs (
        id             BIGINT GENERATED BY DEFAULT AS IDENTITY,
        time           TIMESTAMPTZ NOT NULL,
        device_id      UUID NOT NULL,
        severity       TEXT,
        name           TEXT,
        source_ip      TEXT,
        dest_ip        TEXT,
        app            TEXT,
        action         TEXT,
        category       TEXT,
        rule           TEXT,
        url            TEXT,
        description    TEXT,
        bytes_sent     BIGINT,
        bytes_received BIGINT,
        details        JSONB
    )",
    r"CREATE TABLE IF NOT EXISTS traffic_logs (
        id             BIGINT GENERATED BY DEFAULT AS IDENTITY,
        time           TIMESTAMPTZ NOT NULL,
        device_id      UUID NOT NULL,
        severity       TEXT,
        name           TEXT,
        source_ip      TEXT,
        dest_ip        TEXT,
        app            TEXT,
        action         TEXT,
        category       TEXT,
        rule           TEXT,
        url            TEXT,
        description    TEXT,
        bytes_sent     BIGINT,
        bytes_received BIGINT,
        details        JSONB
    )",

    // ── Application samples (hypertable) ──
    r"CREATE TABLE IF NOT EXISTS application_samples (
        time           TIMESTAMPTZ NOT NULL,
        device_id      UUID NOT NULL,
        app_name       TEXT NOT NULL,
        category       TEXT,
        sessions       BIGINT NOT NULL DEFAULT 0,
        bytes_total    BIGINT NOT NULL DEFAULT 0,
        bytes_sent     BIGINT NOT NULL DEFAULT 0,
        bytes_received BIGINT NOT NULL DEFAULT 0,
        protocols      JSONB,
        ports          JSONB,
        vlans          JSONB,
        zones          JSONB,
        sources        JSONB,
        destinations   JSONB
    )",

    // ── Alerting ──
    r"CREATE TABLE IF NOT EXISTS alert_configs (
        id                    BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
        device_id             UUID NOT NULL,
        metric_type           TEXT NOT NULL,
        threshold_value       DOUBLE PRECISION NOT NULL,
        threshold_operator    TEXT NOT NULL,
        severity              TEXT NOT NULL,
        enabled               BOOLEAN NOT NULL DEFAULT TRUE,
        notification_channels JSONB NOT NULL DEFAULT '[]'::jsonb,
        created_at            TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at            TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    r"CREATE TABLE IF NOT EXISTS alert_history (
        id              BIGINT GENERATED BY DEFAULT AS IDENTITY,
        time            TIMESTAMPTZ NOT NULL,
        alert_config_id BIGINT NOT NULL,
        device_id       UUID NOT NULL,
        metric_type     TEXT NOT NULL,
        threshold_value DOUBLE PRECISION NOT NULL,
        actual_value    DOUBLE PRECISION NOT NULL,
        severity        TEXT NOT NULL,
        message         TEXT NOT NULL,
        triggered_at    TIMESTAMPTZ NOT NULL,
        acknowledged_at TIMESTAMPTZ,
        acknowledged_by TEXT,
        resolved_at     TIMESTAMPTZ,
        resolved_reason TEXT
    )",
    r"CREATE TABLE IF NOT EXISTS alert_cooldowns (
        device_id       UUID NOT NULL,
        alert_config_id BIGINT NOT NULL,
        cooldown_until  TIMESTAMPTZ NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (device_id, alert_config_id)
    )",
    r"CREATE TABLE IF NOT EXISTS maintenance_windows (
        id         BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
        device_id  UUID,
        start_time TIMESTAMPTZ NOT NULL,
        end_time   TIMESTAMPTZ NOT NULL,
        recurrence TEXT NOT NULL DEFAULT 'once',
        enabled    BOOLEAN NOT NULL DEFAULT TRUE
    )",

    // ── Scanning ──
    r"CREATE TABLE IF NOT EXISTS scan_results (
        id               BIGINT GENERATED BY DEFAULT AS IDENTITY,
        time             TIMESTAMPTZ NOT NULL,
        device_id        UUID NOT NULL,
        target_ip        TEXT NOT NULL,
        scan_profile     TEXT NOT NULL,
        duration_seconds DOUBLE PRECISION,
        hostname         TEXT,
        host_status      TEXT,
        os_name          TEXT,
        os_accuracy      INTEGER,
        os_matches       JSONB,
        total_ports      INTEGER NOT NULL DEFAULT 0,
        open_ports_count INTEGER NOT NULL DEFAULT 0,
        ports            JSONB NOT NULL DEFAULT '[]'::jsonb,
        detail           JSONB,
        raw_output       TEXT
    )",
    r"CREATE TABLE IF NOT EXISTS scan_change_events (
        id              BIGINT GENERATED BY DEFAULT AS IDENTITY,
        time            TIMESTAMPTZ NOT NULL,
        device_id       UUID NOT NULL,
        target_ip       TEXT NOT NULL,
        change_type     TEXT NOT NULL,
        severity        TEXT NOT NULL,
        old_value       TEXT,
        new_value       TEXT,
        details         JSONB,
        acknowledged    BOOLEAN NOT NULL DEFAULT FALSE,
        acknowledged_at TIMESTAMPTZ,
        acknowledged_by TEXT
    )",
    r"CREATE TABLE IF NOT EXISTS scheduled_scans (
        id              BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
        device_id       UUID NOT NULL,
        name            TEXT NOT NULL,
        target_type     TEXT NOT NULL,
        target_value    TEXT,
        scan_profile    TEXT NOT NULL DEFAULT 'balanced',
        schedule_type   TEXT NOT NULL,
        schedule_value  TEXT NOT NULL,
        enabled         BOOLEAN NOT NULL DEFAULT TRUE,
        last_run_at     TIMESTAMPTZ,
        last_run_status TEXT,
        last_run_error  TEXT,
        next_run_at     TIMESTAMPTZ,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    r"CREATE TABLE IF NOT EXISTS scan_queue (
        id             BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
        schedule_id    BIGINT,
        device_id      UUID NOT NULL,
        target_ip      TEXT NOT NULL,
        scan_profile   TEXT NOT NULL,
        status         TEXT NOT NULL DEFAULT 'queued',
        queued_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        started_at     TIMESTAMPTZ,
        completed_at   TIMESTAMPTZ,
        scan_result_id BIGINT,
        error_message  TEXT
    )",

    // ── Scheduler self-reports (hypertable) ──
    r"CREATE TABLE IF NOT EXISTS scheduler_stats (
        time              TIMESTAMPTZ NOT NULL,
        state             TEXT NOT NULL,
        total_executions  BIGINT NOT NULL DEFAULT 0,
        total_errors      BIGINT NOT NULL DEFAULT 0,
        uptime_seconds    BIGINT NOT NULL DEFAULT 0,
        jobs              JSONB NOT NULL DEFAULT '{}'::jsonb,
        recent_executions JSONB NOT NULL DEFAULT '[]'::jsonb
    )",
];

/// (table, time column) pairs converted to hypertables, 1-day chunks.
const HYPERTABLES: &[(&str, &str)] = &[
    ("throughput_samples", "time"),
    ("connected_devices", "time"),
    ("threat_logs", "time"),
    ("url_filtering_logs", "time"),
    ("system_logs", "time"),
    ("traffic_logs", "time"),
    ("application_samples", "time"),
    ("alert_history", "time"),
    ("scan_results", "time"),
    ("scan_change_events", "time"),
    ("scheduler_stats", "time"),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_throughput_device_time ON throughput_samples (device_id, time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_connected_device_mac_time ON connected_devices (device_id, mac, time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_connected_device_ip_time ON connected_devices (device_id, ip, time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_threat_logs_device_time ON threat_logs (device_id, time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_url_logs_device_time ON url_filtering_logs (device_id, time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_system_logs_device_time ON system_logs (device_id, time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_traffic_logs_device_time ON traffic_logs (device_id, time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_traffic_logs_source_time ON traffic_logs (device_id, source_ip, time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_app_samples_device_time ON application_samples (device_id, time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_app_samples_device_app_time ON application_samples (device_id, app_name, time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_alert_history_device_time ON alert_history (device_id, time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_alert_history_id ON alert_history (id)",
    "CREATE INDEX IF NOT EXISTS idx_scan_results_target_time ON scan_results (device_id, target_ip, time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_scan_results_id ON scan_results (id)",
    "CREATE INDEX IF NOT EXISTS idx_scan_changes_device_time ON scan_change_events (device_id, time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_scan_changes_id ON scan_change_events (id)",
];

/// (table, raw retention interval).
///
/// `alert_history` is intentionally absent: resolved rows are pruned by the
/// hourly retention job (30 days), unresolved rows are never auto-deleted,
/// which a blanket drop-chunks policy cannot express.
const RETENTION_POLICIES: &[(&str, &str)] = &[
    ("throughput_samples", "7 days"),
    ("connected_devices", "7 days"),
    ("threat_logs", "7 days"),
    ("url_filtering_logs", "7 days"),
    ("system_logs", "7 days"),
    ("traffic_logs", "7 days"),
    ("application_samples", "7 days"),
    ("scan_results", "30 days"),
    ("scan_change_events", "30 days"),
    ("scheduler_stats", "24 hours"),
];

/// (table, compress after, segment-by columns, order-by).
const COMPRESSION_POLICIES: &[(&str, &str, &str, &str)] = &[
    ("throughput_samples", "2 days", "device_id", "time DESC"),
    ("connected_devices", "2 days", "device_id, ip", "time DESC"),
    ("threat_logs", "2 days", "device_id", "time DESC"),
    ("traffic_logs", "2 days", "device_id, source_ip", "time DESC"),
];

/// Continuous aggregates over throughput samples: hourly (kept 30 days)
/// and daily (kept 365 days), exposing the mean of each numeric metric.
const CONTINUOUS_AGGREGATES: &[(&str, &str)] = &[
    (
        "throughput_samples_hourly",
        r"CREATE MATERIALIZED VIEW IF NOT EXISTS throughput_samples_hourly
          WITH (timescaledb.continuous) AS
          SELECT time_bucket('1 hour', time) AS bucket,
                 device_id,
                 AVG(inbound_mbps)  AS inbound_mbps,
                 AVG(outbound_mbps) AS outbound_mbps,
                 AVG(total_mbps)    AS total_mbps,
                 AVG(inbound_pps)   AS inbound_pps,
                 AVG(outbound_pps)  AS outbound_pps,
                 AVG(total_pps)     AS total_pps,
                 AVG(sessions_active)::DOUBLE PRECISION AS sessions_active,
                 AVG(cpu_data_plane)   AS cpu_data_plane,
                 AVG(cpu_mgmt_plane)   AS cpu_mgmt_plane,
                 AVG(memory_used_pct)  AS memory_used_pct
          FROM throughput_samples
          GROUP BY bucket, device_id
          WITH NO DATA",
    ),
    (
        "throughput_samples_daily",
        r"CREATE MATERIALIZED VIEW IF NOT EXISTS throughput_samples_daily
          WITH (timescaledb.continuous) AS
          SELECT time_bucket('1 day', time) AS bucket,
                 device_id,
                 AVG(inbound_mbps)  AS inbound_mbps,
                 AVG(outbound_mbps) AS outbound_mbps,
                 AVG(total_mbps)    AS total_mbps,
                 AVG(inbound_pps)   AS inbound_pps,
                 AVG(outbound_pps)  AS outbound_pps,
                 AVG(total_pps)     AS total_pps,
                 AVG(sessions_active)::DOUBLE PRECISION AS sessions_active,
                 AVG(cpu_data_plane)   AS cpu_data_plane,
                 AVG(cpu_mgmt_plane)   AS cpu_mgmt_plane,
                 AVG(memory_used_pct)  AS memory_used_pct
          FROM throughput_samples
          GROUP BY bucket, device_id
          WITH NO DATA",
    ),
];

/// Outcome of a schema pass: non-critical errors are collected, not thrown.
#[derive(Debug, Default)]
pub struct SchemaReport {
    pub statements_run: usize,
    pub errors: Vec<String>,
}

impl SchemaReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

fn is_already_exists(err: &sqlx::Error) -> bool {
    let text = err.to_string().to_lowercase();
    text.contains("already exists") || text.contains("duplicate")
}

async fn run_tolerant(pool: &PgPool, stmt: &str, what: &str, report: &mut SchemaReport) {
    match sqlx::query(stmt).execute(pool).await {
        Ok(_) => {
            report.statements_run += 1;
        }
        Err(e) if is_already_exists(&e) => {
            report.statements_run += 1;
        }
        Err(e) => {
            warn!(object = what, error = %e, "schema statement failed (continuing)");
            report.errors.push(format!("{what}: {e}"));
        }
    }
}

/// Install or update the full schema. Safe to re-run.
///
/// Returns a report of non-critical errors. Only inability to create the
/// TimescaleDB extension is fatal.
pub async fn ensure_schema(pool: &PgPool) -> Result<SchemaReport, StoreError> {
    let mut report = SchemaReport::default();

    // Extension first — nothing works without it.
    sqlx::query("CREATE EXTENSION IF NOT EXISTS timescaledb CASCADE")
        .execute(pool)
        .await
        .map_err(|e| StoreError::Schema {
            message: format!("failed to create timescaledb extension: {e}"),
        })?;
    info!("timescaledb extension present");

    for stmt in TABLES {
        run_tolerant(pool, stmt, "table", &mut report).await;
    }

    for (table, time_col) in HYPERTABLES {
        let stmt = format!(
            "SELECT create_hypertable('{table}', '{time_col}', \
             chunk_time_interval => INTERVAL '1 day', if_not_exists => TRUE)"
        );
        run_tolerant(pool, &stmt, table, &mut report).await;
    }

    for stmt in INDEXES {
        run_tolerant(pool, stmt, "index", &mut report).await;
    }

    for (table, interval) in RETENTION_POLICIES {
        let stmt = format!(
            "SELECT add_retention_policy('{table}', INTERVAL '{interval}', if_not_exists => TRUE)"
        );
        run_tolerant(pool, &stmt, table, &mut report).await;
    }

    for (table, after, segment_by, order_by) in COMPRESSION_POLICIES {
        let alter = format!(
            "ALTER TABLE {table} SET (timescaledb.compress, \
             timescaledb.compress_segmentby = '{segment_by}', \
             timescaledb.compress_orderby = '{order_by}')"
        );
        run_tolerant(pool, &alter, table, &mut report).await;

        let policy = format!(
            "SELECT add_compression_policy('{table}', INTERVAL '{after}', if_not_exists => TRUE)"
        );
        run_tolerant(pool, &policy, table, &mut report).await;
    }

    for (name, ddl) in CONTINUOUS_AGGREGATES {
        run_tolerant(pool, ddl, name, &mut report).await;

        let refresh = format!(
            "SELECT add_continuous_aggregate_policy('{name}', \
             start_offset => INTERVAL '3 days', end_offset => INTERVAL '1 hour', \
             schedule_interval => INTERVAL '1 hour', if_not_exists => TRUE)"
        );
        run_tolerant(pool, &refresh, name, &mut report).await;
    }

    // Rollup retention: hourly 30 days, daily 365 days.
    for (view, keep) in [
        ("throughput_samples_hourly", "30 days"),
        ("throughput_samples_daily", "365 days"),
    ] {
        let stmt = format!(
            "SELECT add_retention_policy('{view}', INTERVAL '{keep}', if_not_exists => TRUE)"
        );
        run_tolerant(pool, &stmt, view, &mut report).await;
    }

    // Grants are best-effort: the role may not exist in dev setups.
    for stmt in [
        "GRANT ALL PRIVILEGES ON ALL TABLES IN SCHEMA public TO firewatch",
        "GRANT ALL PRIVILEGES ON ALL SEQUENCES IN SCHEMA public TO firewatch",
        "GRANT USAGE ON SCHEMA public TO firewatch",
    ] {
        run_tolerant(pool, stmt, "grant", &mut report).await;
    }

    if report.is_clean() {
        info!(statements = report.statements_run, "schema initialization complete");
    } else {
        warn!(
            statements = report.statements_run,
            errors = report.errors.len(),
            "schema initialization finished with errors"
        );
    }

    Ok(report)
}

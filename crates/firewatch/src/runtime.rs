// Collector runtime: service construction, job registration, config
// change handling, and signal-driven shutdown.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Context;
use chrono::FixedOffset;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use firewatch_api::{FirewallClient, TlsMode, TransportConfig};
use firewatch_config::ConfigHandle;
use firewatch_core::alerts::AlertEngine;
use firewatch_core::collect::DeviceCollector;
use firewatch_core::collect::enrich::{RdnsResolver, SharedVendorDb, StaticVendorDb};
use firewatch_core::notify::Dispatcher;
use firewatch_core::scan::ScanRunner;
use firewatch_core::{CoreError, DeviceRegistry, JobOptions, Scheduler, SnapshotCache, Trigger};
use firewatch_store::model::LogKind;
use firewatch_store::Store;

/// Per-device polling cadences (the contract from the job table).
const THROUGHPUT_INTERVAL: StdDuration = StdDuration::from_secs(5);
const CONNECTED_INTERVAL: StdDuration = StdDuration::from_secs(60);
const APPLICATIONS_INTERVAL: StdDuration = StdDuration::from_secs(60);
const LOGS_INTERVAL: StdDuration = StdDuration::from_secs(60);
const ALERTS_INTERVAL: StdDuration = StdDuration::from_secs(30);
const COOLDOWN_GC_INTERVAL: StdDuration = StdDuration::from_secs(15 * 60);
const RETENTION_INTERVAL: StdDuration = StdDuration::from_secs(60 * 60);
const SELF_REPORT_INTERVAL: StdDuration = StdDuration::from_secs(30);

/// Resolved history retention for alert rows, in days.
const RESOLVED_HISTORY_DAYS: i64 = 30;

pub async fn run_collector(config: ConfigHandle, data_dir: &std::path::Path) -> anyhow::Result<()> {
    let snapshot = config.current();
    let settings = &snapshot.settings;

    let offset = FixedOffset::east_opt(settings.timezone_offset_minutes * 60)
        .context("invalid timezone offset")?;

    // ── Store ────────────────────────────────────────────────────────
    let dsn = settings.database.effective_dsn();
    let store = Store::connect(&dsn, snapshot.devices.devices.len())
        .await
        .context("failed to connect to the time-series store")?;

    // Eager schema install so every table exists before the first tick.
    // Only extension failure is fatal here.
    let report = firewatch_store::schema::ensure_schema(store.pool()).await?;
    if !report.is_clean() {
        warn!(errors = report.errors.len(), "schema installed with non-critical errors");
    }

    // ── Shared services ──────────────────────────────────────────────
    let cache = Arc::new(SnapshotCache::new());
    let vendor: SharedVendorDb = Arc::new(
        StaticVendorDb::load(&data_dir.join("mac_vendors.json"))
            .unwrap_or_else(|e| {
                warn!(error = %e, "vendor database unavailable, lookups disabled");
                StaticVendorDb::default()
            }),
    );
    let rdns = Arc::new(RdnsResolver::new(&settings.dns_nameservers));
    let dispatcher = Arc::new(Dispatcher::new(settings.notification_channels.clone()));
    let engine = Arc::new(AlertEngine::new(
        Arc::new(store.clone()),
        Arc::clone(&dispatcher),
        offset,
    ));
    let runner = Arc::new(ScanRunner::new(
        store.clone(),
        config.subscribe(),
        settings.max_concurrent_scans,
    ));

    let scheduler = Scheduler::new(
        offset,
        StdDuration::from_secs(settings.scheduler_stop_deadline_secs),
    );

    // ── Device jobs ──────────────────────────────────────────────────
    let wiring = Wiring {
        config: &config,
        store: &store,
        cache: &cache,
        vendor: &vendor,
        rdns: &rdns,
        scheduler: &scheduler,
    };
    let registry = Arc::new(Mutex::new(Arc::new(DeviceRegistry::from_snapshot(&snapshot))));
    let device_jobs = Arc::new(Mutex::new(HashSet::new()));
    register_device_jobs(&wiring, &registry.lock().await.clone(), &mut *device_jobs.lock().await)
        .await?;

    // ── Fleet-wide jobs ──────────────────────────────────────────────
    {
        let engine = Arc::clone(&engine);
        let cache = Arc::clone(&cache);
        let registry = Arc::clone(&registry);
        scheduler
            .register(
                "alerts.evaluate",
                Trigger::Interval(ALERTS_INTERVAL),
                JobOptions::default(),
                move || {
                    let engine = Arc::clone(&engine);
                    let cache = Arc::clone(&cache);
                    let registry = Arc::clone(&registry);
                    async move {
                        let registry = registry.lock().await.clone();
                        engine.evaluation_tick(&registry, &cache).await
                    }
                },
            )
            .await;
    }

    {
        let store = store.clone();
        scheduler
            .register(
                "alerts.cooldown_gc",
                Trigger::Interval(COOLDOWN_GC_INTERVAL),
                JobOptions::default(),
                move || {
                    let store = store.clone();
                    async move {
                        store.clear_expired_cooldowns().await?;
                        Ok(())
                    }
                },
            )
            .await;
    }

    {
        let store = store.clone();
        scheduler
            .register(
                "retention.cleanup",
                Trigger::Interval(RETENTION_INTERVAL),
                JobOptions::default(),
                move || {
                    let store = store.clone();
                    async move {
                        store.cleanup_resolved_history(RESOLVED_HISTORY_DAYS).await?;
                        for kind in [LogKind::Threat, LogKind::Url, LogKind::System, LogKind::Traffic]
                        {
                            store.enforce_log_caps(kind).await?;
                        }
                        Ok(())
                    }
                },
            )
            .await;
    }

    {
        let store = store.clone();
        let scheduler_handle = scheduler.clone();
        scheduler
            .register(
                "scheduler.self_report",
                Trigger::Interval(SELF_REPORT_INTERVAL),
                JobOptions::default(),
                move || {
                    let store = store.clone();
                    let scheduler = scheduler_handle.clone();
                    async move {
                        let stats = scheduler.stats().await;
                        let jobs = serde_json::to_value(&stats.jobs).unwrap_or_default();
                        let recent =
                            serde_json::to_value(&stats.recent_executions).unwrap_or_default();
                        store
                            .insert_scheduler_stats(
                                &stats.state,
                                i64::try_from(stats.total_executions).unwrap_or(i64::MAX),
                                i64::try_from(stats.total_errors).unwrap_or(i64::MAX),
                                stats.uptime_seconds,
                                &jobs,
                                &recent,
                            )
                            .await?;
                        Ok(())
                    }
                },
            )
            .await;
    }

    // ── Scan schedules from the store ────────────────────────────────
    register_scan_schedules(&scheduler, &store, &runner).await?;

    // ── Config change watcher ────────────────────────────────────────
    {
        let mut rx = config.subscribe();
        let registry = Arc::clone(&registry);
        let device_jobs = Arc::clone(&device_jobs);
        let scheduler_for_watch = scheduler.clone();
        let store_for_watch = store.clone();
        let cache_for_watch = Arc::clone(&cache);
        let vendor_for_watch = Arc::clone(&vendor);
        let rdns_for_watch = Arc::clone(&rdns);
        let config_handle = config.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                info!("configuration changed, rebuilding device jobs");

                let new_registry = Arc::new(DeviceRegistry::from_snapshot(&snapshot));
                *registry.lock().await = Arc::clone(&new_registry);

                let wiring = WatchWiring {
                    config: config_handle.clone(),
                    store: store_for_watch.clone(),
                    cache: Arc::clone(&cache_for_watch),
                    vendor: Arc::clone(&vendor_for_watch),
                    rdns: Arc::clone(&rdns_for_watch),
                    scheduler: scheduler_for_watch.clone(),
                    log_fetch_count: snapshot.settings.log_fetch_count,
                };
                if let Err(e) =
                    rebuild_device_jobs(&wiring, &new_registry, &device_jobs).await
                {
                    warn!(error = %e, "device job rebuild failed");
                }
            }
        });
    }

    // ── Run until interrupted ────────────────────────────────────────
    scheduler.start().await;
    info!("collector running; press Ctrl-C to stop");

    wait_for_shutdown().await;

    info!("shutting down, waiting for running jobs");
    scheduler.stop(true).await;
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, relying on Ctrl-C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

// ── Device job wiring ───────────────────────────────────────────────

struct Wiring<'a> {
    config: &'a ConfigHandle,
    store: &'a Store,
    cache: &'a Arc<SnapshotCache>,
    vendor: &'a SharedVendorDb,
    rdns: &'a Arc<RdnsResolver>,
    scheduler: &'a Scheduler,
}

struct WatchWiring {
    config: tokio::sync::watch::Receiver<Arc<firewatch_config::ConfigSnapshot>>,
    store: Store,
    cache: Arc<SnapshotCache>,
    vendor: SharedVendorDb,
    rdns: Arc<RdnsResolver>,
    scheduler: Scheduler,
    log_fetch_count: u32,
}

fn build_collector(
    device: &Arc<firewatch_core::Device>,
    config_rx: tokio::sync::watch::Receiver<Arc<firewatch_config::ConfigSnapshot>>,
    store: Store,
    cache: Arc<SnapshotCache>,
    vendor: SharedVendorDb,
    rdns: Arc<RdnsResolver>,
    accept_invalid_certs: bool,
    log_fetch_count: u32,
) -> Result<Arc<DeviceCollector>, CoreError> {
    let transport = TransportConfig {
        tls: if accept_invalid_certs {
            TlsMode::DangerAcceptInvalid
        } else {
            TlsMode::System
        },
        ..TransportConfig::default()
    };
    let client = Arc::new(FirewallClient::new(
        &device.address,
        device.api_key.clone(),
        &transport,
    )?);

    Ok(Arc::new(DeviceCollector::new(
        Arc::clone(device),
        client,
        store,
        cache,
        config_rx,
        vendor,
        rdns,
        log_fetch_count,
    )))
}

async fn register_collector_jobs(
    scheduler: &Scheduler,
    collector: &Arc<DeviceCollector>,
    device_id: Uuid,
    job_ids: &mut HashSet<String>,
) {
    let throughput_id = format!("throughput.collect.{device_id}");
    let c = Arc::clone(collector);
    scheduler
        .register(
            &throughput_id,
            Trigger::Interval(THROUGHPUT_INTERVAL),
            JobOptions::default(),
            move || {
                let c = Arc::clone(&c);
                async move { c.throughput_tick().await }
            },
        )
        .await;
    job_ids.insert(throughput_id);

    let connected_id = format!("connected_devices.collect.{device_id}");
    let c = Arc::clone(collector);
    scheduler
        .register(
            &connected_id,
            Trigger::Interval(CONNECTED_INTERVAL),
            JobOptions::default(),
            move || {
                let c = Arc::clone(&c);
                async move { c.connected_tick().await }
            },
        )
        .await;
    job_ids.insert(connected_id);

    let apps_id = format!("applications.collect.{device_id}");
    let c = Arc::clone(collector);
    scheduler
        .register(
            &apps_id,
            Trigger::Interval(APPLICATIONS_INTERVAL),
            JobOptions::default(),
            move || {
                let c = Arc::clone(&c);
                async move { c.applications_tick().await }
            },
        )
        .await;
    job_ids.insert(apps_id);

    let logs_id = format!("logs.collect.{device_id}");
    let c = Arc::clone(collector);
    scheduler
        .register(
            &logs_id,
            Trigger::Interval(LOGS_INTERVAL),
            JobOptions::default(),
            move || {
                let c = Arc::clone(&c);
                async move { c.logs_tick().await }
            },
        )
        .await;
    job_ids.insert(logs_id);
}

async fn register_device_jobs(
    wiring: &Wiring<'_>,
    registry: &Arc<DeviceRegistry>,
    job_ids: &mut HashSet<String>,
) -> anyhow::Result<()> {
    let snapshot = wiring.config.current();
    for device in registry.enabled() {
        let collector = build_collector(
            device,
            wiring.config.subscribe(),
            wiring.store.clone(),
            Arc::clone(wiring.cache),
            Arc::clone(wiring.vendor),
            Arc::clone(wiring.rdns),
            snapshot.settings.accept_invalid_certs,
            snapshot.settings.log_fetch_count,
        )
        .with_context(|| format!("failed to build collector for {}", device.name))?;

        register_collector_jobs(wiring.scheduler, &collector, device.id, job_ids).await;
        info!(device = %device.name, id = %device.id, "device jobs registered");
    }
    Ok(())
}

/// On config change: drop jobs for devices that disappeared or were
/// disabled, (re)register jobs for the current enabled set.
async fn rebuild_device_jobs(
    wiring: &WatchWiring,
    registry: &Arc<DeviceRegistry>,
    job_ids: &Mutex<HashSet<String>>,
) -> anyhow::Result<()> {
    let mut ids = job_ids.lock().await;

    // Remove everything first; re-registration below replaces the live set.
    for id in ids.drain() {
        wiring.scheduler.remove(&id).await;
    }

    let snapshot = wiring.config.borrow().clone();
    for device in registry.enabled() {
        let collector = build_collector(
            device,
            wiring.config.clone(),
            wiring.store.clone(),
            Arc::clone(&wiring.cache),
            Arc::clone(&wiring.vendor),
            Arc::clone(&wiring.rdns),
            snapshot.settings.accept_invalid_certs,
            wiring.log_fetch_count,
        )?;
        register_collector_jobs(&wiring.scheduler, &collector, device.id, &mut ids).await;
    }
    Ok(())
}

// ── Scan schedule jobs ──────────────────────────────────────────────

async fn register_scan_schedules(
    scheduler: &Scheduler,
    store: &Store,
    runner: &Arc<ScanRunner>,
) -> anyhow::Result<()> {
    let schedules = store.scheduled_scans(None, true).await?;
    for schedule in schedules {
        let trigger = match Trigger::parse(&schedule.schedule_type, &schedule.schedule_value) {
            Ok(t) => t,
            Err(e) => {
                warn!(schedule = schedule.id, error = %e, "invalid scan schedule, skipping");
                continue;
            }
        };

        let schedule_id = schedule.id;
        let runner = Arc::clone(runner);
        scheduler
            .register(
                &format!("scan.schedule.{schedule_id}"),
                trigger,
                JobOptions::default(),
                move || {
                    let runner = Arc::clone(&runner);
                    async move { runner.execute_schedule(schedule_id).await }
                },
            )
            .await;
    }
    Ok(())
}

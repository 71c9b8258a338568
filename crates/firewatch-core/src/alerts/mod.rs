//! Alert engine: threshold evaluation under cooldown and maintenance
//! constraints, trigger processing, and the template catalog.
//!
//! The engine talks to persistence through the [`AlertStorage`] port so
//! evaluation semantics are testable without a database; [`Store`]
//! implements the port for production.

pub mod eval;
pub mod templates;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use firewatch_store::model::{
    AlertConfigRow, CompareOp, IpBandwidth, MaintenanceWindowRow, Severity,
};
use firewatch_store::{Store, StoreError};

use crate::cache::SnapshotCache;
use crate::notify::{AlertNotification, Dispatcher};
use crate::registry::DeviceRegistry;
use crate::CoreError;

/// Default cooldown between successive triggers of one configuration.
pub const DEFAULT_COOLDOWN_SECS: i64 = 900;

/// Window behind the `app_<name>` and `per_ip_bandwidth_5min` metrics.
const SYNTHETIC_WINDOW_MINUTES: i64 = 5;

/// Scalar metrics accepted at the CRUD boundary. `app_<name>` is accepted
/// as an open family on top of these.
pub const VALID_METRICS: &[&str] = &[
    "cpu",
    "memory",
    "sessions",
    "threats_critical",
    "interface_errors",
    "throughput_in",
    "throughput_out",
    "throughput_total",
    "per_ip_bandwidth_5min",
];

/// One history row to record.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub alert_config_id: i64,
    pub device_id: Uuid,
    pub metric_type: String,
    pub threshold_value: f64,
    pub actual_value: f64,
    pub severity: String,
    pub message: String,
}

/// Persistence port consumed by the engine.
#[async_trait]
pub trait AlertStorage: Send + Sync {
    async fn enabled_configs(&self, device: Uuid) -> Result<Vec<AlertConfigRow>, StoreError>;
    async fn maintenance_windows(
        &self,
        device: Uuid,
    ) -> Result<Vec<MaintenanceWindowRow>, StoreError>;
    async fn cooldown_active(&self, device: Uuid, config_id: i64) -> Result<bool, StoreError>;
    async fn set_cooldown(
        &self,
        device: Uuid,
        config_id: i64,
        until: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn record_history(&self, entry: &HistoryEntry) -> Result<i64, StoreError>;
    async fn app_bytes_in_window(&self, device: Uuid, app: &str) -> Result<i64, StoreError>;
    async fn per_ip_bandwidth(
        &self,
        device: Uuid,
        threshold_bytes: i64,
    ) -> Result<Vec<IpBandwidth>, StoreError>;
    async fn create_config(
        &self,
        device: Uuid,
        metric_type: &str,
        threshold: f64,
        operator: &str,
        severity: &str,
        channels: &[i64],
    ) -> Result<i64, StoreError>;
}

#[async_trait]
impl AlertStorage for Store {
    async fn enabled_configs(&self, device: Uuid) -> Result<Vec<AlertConfigRow>, StoreError> {
        self.alert_configs(Some(device), true).await
    }

    async fn maintenance_windows(
        &self,
        device: Uuid,
    ) -> Result<Vec<MaintenanceWindowRow>, StoreError> {
        self.maintenance_windows_for(device).await
    }

    async fn cooldown_active(&self, device: Uuid, config_id: i64) -> Result<bool, StoreError> {
        Store::cooldown_active(self, device, config_id).await
    }

    async fn set_cooldown(
        &self,
        device: Uuid,
        config_id: i64,
        until: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Store::set_cooldown(self, device, config_id, until).await
    }

    async fn record_history(&self, entry: &HistoryEntry) -> Result<i64, StoreError> {
        self.insert_alert_history(
            entry.alert_config_id,
            entry.device_id,
            &entry.metric_type,
            entry.threshold_value,
            entry.actual_value,
            &entry.severity,
            &entry.message,
        )
        .await
    }

    async fn app_bytes_in_window(&self, device: Uuid, app: &str) -> Result<i64, StoreError> {
        Store::app_bytes_in_window(self, device, app, Duration::minutes(SYNTHETIC_WINDOW_MINUTES))
            .await
    }

    async fn per_ip_bandwidth(
        &self,
        device: Uuid,
        threshold_bytes: i64,
    ) -> Result<Vec<IpBandwidth>, StoreError> {
        Store::per_ip_bandwidth(
            self,
            device,
            Duration::minutes(SYNTHETIC_WINDOW_MINUTES),
            threshold_bytes,
        )
        .await
    }

    async fn create_config(
        &self,
        device: Uuid,
        metric_type: &str,
        threshold: f64,
        operator: &str,
        severity: &str,
        channels: &[i64],
    ) -> Result<i64, StoreError> {
        self.create_alert_config(device, metric_type, threshold, operator, severity, channels)
            .await
    }
}

/// A threshold crossing ready for recording and dispatch.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub config: AlertConfigRow,
    pub actual_value: f64,
    pub message: String,
    pub per_ip: Option<Vec<IpBandwidth>>,
}

/// The alert engine.
pub struct AlertEngine {
    storage: Arc<dyn AlertStorage>,
    dispatcher: Arc<Dispatcher>,
    offset: FixedOffset,
    cooldown: Duration,
}

impl std::fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertEngine").finish_non_exhaustive()
    }
}

impl AlertEngine {
    pub fn new(storage: Arc<dyn AlertStorage>, dispatcher: Arc<Dispatcher>, offset: FixedOffset) -> Self {
        Self {
            storage,
            dispatcher,
            offset,
            cooldown: Duration::seconds(DEFAULT_COOLDOWN_SECS),
        }
    }

    // ── Evaluation ───────────────────────────────────────────────────

    /// Evaluate every enabled configuration for one device against the
    /// supplied metric map, honoring maintenance windows and cooldowns.
    pub async fn evaluate_device(
        &self,
        device_id: Uuid,
        metrics: &HashMap<String, f64>,
    ) -> Result<Vec<Trigger>, CoreError> {
        let now = Utc::now();

        let windows = self.storage.maintenance_windows(device_id).await?;
        if windows.iter().any(|w| eval::window_matches(w, now, self.offset)) {
            debug!(device = %device_id, "in maintenance window, suppressing evaluation");
            return Ok(Vec::new());
        }

        let configs = self.storage.enabled_configs(device_id).await?;
        let mut triggers = Vec::new();

        for config in configs {
            let Ok(op) = CompareOp::from_str(&config.threshold_operator) else {
                warn!(config = config.id, operator = %config.threshold_operator, "unknown operator, skipping");
                continue;
            };

            let (actual, per_ip) = match self
                .resolve_metric(device_id, &config, metrics)
                .await?
            {
                Some(resolved) => resolved,
                None => continue,
            };

            // Per-IP alerts fire on any offender; the threshold bounds each
            // client's volume, and the actual value is the offender count.
            let crossed = if config.metric_type == "per_ip_bandwidth_5min" {
                actual > 0.0
            } else {
                eval::evaluate_threshold(actual, config.threshold_value, op)
            };
            if !crossed {
                continue;
            }

            if self.storage.cooldown_active(device_id, config.id).await? {
                debug!(config = config.id, "in cooldown, skipping trigger");
                continue;
            }

            let message = eval::format_message(
                &config.metric_type,
                actual,
                config.threshold_value,
                op,
                per_ip.as_deref(),
            );
            triggers.push(Trigger {
                config,
                actual_value: actual,
                message,
                per_ip,
            });
        }

        Ok(triggers)
    }

    /// Resolve the metric a configuration watches: a scalar from the
    /// latest snapshot, or one of the synthetic windowed kinds.
    async fn resolve_metric(
        &self,
        device_id: Uuid,
        config: &AlertConfigRow,
        metrics: &HashMap<String, f64>,
    ) -> Result<Option<(f64, Option<Vec<IpBandwidth>>)>, CoreError> {
        let metric = config.metric_type.as_str();

        if metric == "per_ip_bandwidth_5min" {
            #[allow(clippy::cast_possible_truncation)]
            let threshold_bytes = (config.threshold_value * 1_000_000.0) as i64;
            let offenders = self.storage.per_ip_bandwidth(device_id, threshold_bytes).await?;
            #[allow(clippy::cast_precision_loss)]
            return Ok(Some((offenders.len() as f64, Some(offenders))));
        }

        if let Some(app) = metric.strip_prefix("app_") {
            let bytes = self.storage.app_bytes_in_window(device_id, app).await?;
            #[allow(clippy::cast_precision_loss)]
            return Ok(Some((bytes as f64 / 1_000_000.0, None)));
        }

        Ok(metrics.get(metric).map(|v| (*v, None)))
    }

    // ── Trigger processing ───────────────────────────────────────────

    /// Record each trigger (history + cooldown) and dispatch its
    /// notifications. Delivery failures are logged but never undo the
    /// recording.
    pub async fn process_triggers(
        &self,
        device_id: Uuid,
        device_name: &str,
        triggers: Vec<Trigger>,
    ) -> Result<usize, CoreError> {
        let count = triggers.len();

        for trigger in triggers {
            let entry = HistoryEntry {
                alert_config_id: trigger.config.id,
                device_id,
                metric_type: trigger.config.metric_type.clone(),
                threshold_value: trigger.config.threshold_value,
                actual_value: trigger.actual_value,
                severity: trigger.config.severity.clone(),
                message: trigger.message.clone(),
            };
            self.storage.record_history(&entry).await?;
            self.storage
                .set_cooldown(device_id, trigger.config.id, Utc::now() + self.cooldown)
                .await?;

            let channels: Vec<i64> =
                serde_json::from_value(trigger.config.notification_channels.clone())
                    .unwrap_or_default();
            if channels.is_empty() {
                continue;
            }

            let notification = AlertNotification {
                device_id,
                device_name: device_name.to_owned(),
                metric_type: trigger.config.metric_type.clone(),
                severity: trigger.config.severity.clone(),
                threshold_value: trigger.config.threshold_value,
                actual_value: trigger.actual_value,
                message: trigger.message.clone(),
                triggered_at: Utc::now(),
            };
            for delivery in self.dispatcher.send(&notification, &channels).await {
                if let Err(reason) = delivery.result {
                    warn!(
                        channel = delivery.channel_id,
                        error = %reason,
                        "alert notification delivery failed (alert remains recorded)"
                    );
                }
            }
        }

        Ok(count)
    }

    /// One evaluation pass over the whole fleet, driven by the 30-second
    /// `alerts.evaluate` job. Per-device failures are logged and do not
    /// stop the pass.
    pub async fn evaluation_tick(
        &self,
        registry: &DeviceRegistry,
        cache: &SnapshotCache,
    ) -> Result<(), CoreError> {
        for device in registry.enabled() {
            let Some(sample) = cache.latest_unbounded(device.id) else {
                continue;
            };
            let metrics = SnapshotCache::metrics_for(&sample);

            match self.evaluate_device(device.id, &metrics).await {
                Ok(triggers) if !triggers.is_empty() => {
                    if let Err(e) = self
                        .process_triggers(device.id, &device.name, triggers)
                        .await
                    {
                        warn!(device = %device.name, error = %e, "trigger processing failed");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(device = %device.name, error = %e, "evaluation failed"),
            }
        }
        Ok(())
    }

    // ── CRUD boundary ────────────────────────────────────────────────

    /// Validate a metric type: a known scalar, a synthetic kind, or an
    /// `app_<name>` family member.
    pub fn validate_metric_type(metric: &str) -> Result<(), CoreError> {
        if VALID_METRICS.contains(&metric) || metric.strip_prefix("app_").is_some_and(|a| !a.is_empty())
        {
            Ok(())
        } else {
            Err(CoreError::Validation {
                field: "metric_type".into(),
                reason: format!(
                    "must be one of {} or app_<name>",
                    VALID_METRICS.join(", ")
                ),
            })
        }
    }

    /// Create a configuration after validating metric, operator, and
    /// severity against the allowlists.
    pub async fn create_config(
        &self,
        device_id: Uuid,
        metric_type: &str,
        threshold: f64,
        operator: &str,
        severity: &str,
        channels: &[i64],
    ) -> Result<i64, CoreError> {
        Self::validate_metric_type(metric_type)?;
        let op = CompareOp::from_str(operator).map_err(|_| CoreError::Validation {
            field: "threshold_operator".into(),
            reason: format!("unknown operator '{operator}'"),
        })?;
        let sev = Severity::from_str(severity).map_err(|_| CoreError::Validation {
            field: "severity".into(),
            reason: format!("unknown severity '{severity}'"),
        })?;

        Ok(self
            .storage
            .create_config(
                device_id,
                metric_type,
                threshold,
                &op.to_string(),
                &sev.to_string(),
                channels,
            )
            .await?)
    }

    /// Apply a template: one configuration per rule, all wired to the
    /// given channels. Returns the created config ids.
    pub async fn apply_template(
        &self,
        device_id: Uuid,
        template_id: &str,
        channels: &[i64],
    ) -> Result<Vec<i64>, CoreError> {
        let template = templates::by_id(template_id).ok_or_else(|| CoreError::Validation {
            field: "template_id".into(),
            reason: format!("unknown template '{template_id}'"),
        })?;

        let mut created = Vec::with_capacity(template.rules.len());
        for rule in template.rules {
            let id = self
                .storage
                .create_config(
                    device_id,
                    rule.metric_type,
                    rule.threshold,
                    &rule.operator.to_string(),
                    &rule.severity.to_string(),
                    channels,
                )
                .await?;
            created.push(id);
        }
        Ok(created)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// In-memory AlertStorage for engine tests.
    #[derive(Default)]
    struct FakeStorage {
        configs: Mutex<Vec<AlertConfigRow>>,
        windows: Mutex<Vec<MaintenanceWindowRow>>,
        cooldowns: Mutex<HashMap<(Uuid, i64), DateTime<Utc>>>,
        history: Mutex<Vec<HistoryEntry>>,
        app_bytes: Mutex<HashMap<String, i64>>,
        per_ip: Mutex<Vec<IpBandwidth>>,
        next_id: Mutex<i64>,
    }

    impl FakeStorage {
        fn push_config(&self, device: Uuid, metric: &str, threshold: f64, op: &str, severity: &str) -> i64 {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            let id = *next;
            self.configs.lock().unwrap().push(AlertConfigRow {
                id,
                device_id: device,
                metric_type: metric.into(),
                threshold_value: threshold,
                threshold_operator: op.into(),
                severity: severity.into(),
                enabled: true,
                notification_channels: json!([]),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            });
            id
        }

        fn expire_cooldown(&self, device: Uuid, config_id: i64) {
            self.cooldowns
                .lock()
                .unwrap()
                .insert((device, config_id), Utc::now() - Duration::seconds(1));
        }

        fn history_len(&self) -> usize {
            self.history.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AlertStorage for FakeStorage {
        async fn enabled_configs(&self, device: Uuid) -> Result<Vec<AlertConfigRow>, StoreError> {
            Ok(self
                .configs
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.device_id == device && c.enabled)
                .cloned()
                .collect())
        }

        async fn maintenance_windows(
            &self,
            device: Uuid,
        ) -> Result<Vec<MaintenanceWindowRow>, StoreError> {
            Ok(self
                .windows
                .lock()
                .unwrap()
                .iter()
                .filter(|w| w.device_id.is_none() || w.device_id == Some(device))
                .cloned()
                .collect())
        }

        async fn cooldown_active(&self, device: Uuid, config_id: i64) -> Result<bool, StoreError> {
            Ok(self
                .cooldowns
                .lock()
                .unwrap()
                .get(&(device, config_id))
                .is_some_and(|until| *until > Utc::now()))
        }

        async fn set_cooldown(
            &self,
            device: Uuid,
            config_id: i64,
            until: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.cooldowns.lock().unwrap().insert((device, config_id), until);
            Ok(())
        }

        async fn record_history(&self, entry: &HistoryEntry) -> Result<i64, StoreError> {
            let mut history = self.history.lock().unwrap();
            history.push(entry.clone());
            Ok(history.len() as i64)
        }

        async fn app_bytes_in_window(&self, _device: Uuid, app: &str) -> Result<i64, StoreError> {
            Ok(*self.app_bytes.lock().unwrap().get(app).unwrap_or(&0))
        }

        async fn per_ip_bandwidth(
            &self,
            _device: Uuid,
            threshold_bytes: i64,
        ) -> Result<Vec<IpBandwidth>, StoreError> {
            Ok(self
                .per_ip
                .lock()
                .unwrap()
                .iter()
                .filter(|row| row.total_bytes >= threshold_bytes)
                .cloned()
                .collect())
        }

        async fn create_config(
            &self,
            device: Uuid,
            metric_type: &str,
            threshold: f64,
            operator: &str,
            severity: &str,
            _channels: &[i64],
        ) -> Result<i64, StoreError> {
            Ok(self.push_config(device, metric_type, threshold, operator, severity))
        }
    }

    fn engine(storage: Arc<FakeStorage>) -> AlertEngine {
        AlertEngine::new(
            storage,
            Arc::new(Dispatcher::new(Vec::new())),
            FixedOffset::east_opt(0).unwrap(),
        )
    }

    fn metrics(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), *v)).collect()
    }

    #[tokio::test]
    async fn cpu_critical_triggers_once_per_cooldown() {
        let storage = Arc::new(FakeStorage::default());
        let device = Uuid::new_v4();
        let config_id = storage.push_config(device, "cpu", 90.0, ">", "critical");
        let engine = engine(Arc::clone(&storage));

        // First evaluation: one trigger, one history row.
        let triggers = engine.evaluate_device(device, &metrics(&[("cpu", 95.0)])).await.unwrap();
        assert_eq!(triggers.len(), 1);
        assert!((triggers[0].actual_value - 95.0).abs() < f64::EPSILON);
        engine.process_triggers(device, "fw", triggers).await.unwrap();
        assert_eq!(storage.history_len(), 1);

        // While the cooldown holds, repeated crossings stay silent.
        for cpu in [96.0, 97.0] {
            let again = engine.evaluate_device(device, &metrics(&[("cpu", cpu)])).await.unwrap();
            assert!(again.is_empty(), "expected cooldown suppression");
        }
        assert_eq!(storage.history_len(), 1);

        // After expiry the next crossing fires again.
        storage.expire_cooldown(device, config_id);
        let after = engine.evaluate_device(device, &metrics(&[("cpu", 92.0)])).await.unwrap();
        assert_eq!(after.len(), 1);
    }

    #[tokio::test]
    async fn maintenance_window_suppresses_everything() {
        let storage = Arc::new(FakeStorage::default());
        let device = Uuid::new_v4();
        storage.push_config(device, "memory", 80.0, ">", "warning");
        storage.windows.lock().unwrap().push(MaintenanceWindowRow {
            id: 1,
            device_id: None, // global
            start_time: Utc::now() - Duration::hours(1),
            end_time: Utc::now() + Duration::hours(1),
            recurrence: "once".into(),
            enabled: true,
        });
        let engine = engine(Arc::clone(&storage));

        let triggers = engine
            .evaluate_device(device, &metrics(&[("memory", 95.0)]))
            .await
            .unwrap();
        assert!(triggers.is_empty());
        assert_eq!(storage.history_len(), 0);
    }

    #[tokio::test]
    async fn per_ip_rule_counts_offenders_and_lists_them() {
        let storage = Arc::new(FakeStorage::default());
        let device = Uuid::new_v4();
        storage.push_config(device, "per_ip_bandwidth_5min", 1000.0, ">", "warning");
        *storage.per_ip.lock().unwrap() = vec![
            IpBandwidth {
                ip: "192.168.1.10".into(),
                direction: "download".into(),
                total_bytes: 2_500_000_000,
                hostname: Some("johns-laptop".into()),
            },
            // Below the 1000 MB threshold -> filtered by storage.
            IpBandwidth {
                ip: "192.168.1.20".into(),
                direction: "upload".into(),
                total_bytes: 300_000_000,
                hostname: None,
            },
        ];
        let engine = engine(Arc::clone(&storage));

        let triggers = engine.evaluate_device(device, &metrics(&[])).await.unwrap();
        assert_eq!(triggers.len(), 1);
        assert!((triggers[0].actual_value - 1.0).abs() < f64::EPSILON);

        let offenders = triggers[0].per_ip.as_ref().unwrap();
        assert_eq!(offenders.len(), 1);
        assert_eq!(offenders[0].ip, "192.168.1.10");
        assert!(triggers[0].message.contains("192.168.1.10 (johns-laptop) downloaded 2500 MB"));
    }

    #[tokio::test]
    async fn app_metric_resolves_to_megabytes() {
        let storage = Arc::new(FakeStorage::default());
        let device = Uuid::new_v4();
        storage.push_config(device, "app_netflix", 500.0, ">", "info");
        storage
            .app_bytes
            .lock()
            .unwrap()
            .insert("netflix".into(), 600_000_000);
        let engine = engine(Arc::clone(&storage));

        let triggers = engine.evaluate_device(device, &metrics(&[])).await.unwrap();
        assert_eq!(triggers.len(), 1);
        assert!((triggers[0].actual_value - 600.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn absent_scalar_metric_is_skipped() {
        let storage = Arc::new(FakeStorage::default());
        let device = Uuid::new_v4();
        storage.push_config(device, "cpu", 90.0, ">", "critical");
        let engine = engine(Arc::clone(&storage));

        let triggers = engine
            .evaluate_device(device, &metrics(&[("memory", 99.0)]))
            .await
            .unwrap();
        assert!(triggers.is_empty());
    }

    #[tokio::test]
    async fn unknown_operator_evaluates_false() {
        let storage = Arc::new(FakeStorage::default());
        let device = Uuid::new_v4();
        storage.push_config(device, "cpu", 90.0, "~", "critical");
        let engine = engine(Arc::clone(&storage));

        let triggers = engine.evaluate_device(device, &metrics(&[("cpu", 95.0)])).await.unwrap();
        assert!(triggers.is_empty());
    }

    #[tokio::test]
    async fn create_config_validates_allowlists() {
        let storage = Arc::new(FakeStorage::default());
        let device = Uuid::new_v4();
        let engine = engine(Arc::clone(&storage));

        assert!(engine.create_config(device, "cpu", 90.0, ">", "critical", &[]).await.is_ok());
        assert!(engine.create_config(device, "app_ssl", 100.0, ">=", "info", &[]).await.is_ok());

        assert!(matches!(
            engine.create_config(device, "load", 1.0, ">", "critical", &[]).await,
            Err(CoreError::Validation { .. })
        ));
        assert!(matches!(
            engine.create_config(device, "cpu", 1.0, "=>", "critical", &[]).await,
            Err(CoreError::Validation { .. })
        ));
        assert!(matches!(
            engine.create_config(device, "cpu", 1.0, ">", "fatal", &[]).await,
            Err(CoreError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn template_application_creates_all_rules() {
        let storage = Arc::new(FakeStorage::default());
        let device = Uuid::new_v4();
        let engine = engine(Arc::clone(&storage));

        let created = engine
            .apply_template(device, "critical_system_health", &[1])
            .await
            .unwrap();
        assert_eq!(created.len(), 3);
        assert_eq!(storage.configs.lock().unwrap().len(), 3);

        assert!(engine.apply_template(device, "nope", &[]).await.is_err());
    }
}

// Latest-snapshot cache: single writer (the device's collector), many
// readers (read adapter, alert engine).
//
// Each device's slot is an ArcSwap, so a reader always observes either the
// prior complete sample or the new complete sample, never a torn update.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::model::ThroughputSample;

#[derive(Debug, Default)]
pub struct SnapshotCache {
    slots: DashMap<Uuid, Arc<ArcSwap<ThroughputSample>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a device's newest sample.
    pub fn update(&self, sample: ThroughputSample) {
        let device = sample.device_id;
        match self.slots.get(&device) {
            Some(slot) => slot.store(Arc::new(sample)),
            None => {
                self.slots
                    .insert(device, Arc::new(ArcSwap::from_pointee(sample)));
            }
        }
    }

    /// The device's latest sample if it is no older than `max_age`.
    pub fn latest(&self, device: Uuid, max_age: Duration) -> Option<Arc<ThroughputSample>> {
        let slot = self.slots.get(&device)?;
        let sample = slot.load_full();
        (Utc::now() - sample.time <= max_age).then_some(sample)
    }

    /// The latest sample regardless of age.
    pub fn latest_unbounded(&self, device: Uuid) -> Option<Arc<ThroughputSample>> {
        self.slots.get(&device).map(|slot| slot.load_full())
    }

    /// Flatten a sample into the metric map the alert engine evaluates.
    pub fn metrics_for(sample: &ThroughputSample) -> HashMap<String, f64> {
        let mut metrics = HashMap::new();

        if let Some(cpu) = sample.cpu_data_plane {
            metrics.insert("cpu".to_owned(), cpu);
        }
        if let Some(mem) = sample.memory_used_pct {
            metrics.insert("memory".to_owned(), mem);
        }
        if let Some(sessions) = sample.sessions_active {
            #[allow(clippy::cast_precision_loss)]
            metrics.insert("sessions".to_owned(), sessions as f64);
        }
        #[allow(clippy::cast_precision_loss)]
        {
            metrics.insert("threats_critical".to_owned(), sample.critical_threats as f64);
            if let Some(errors) = sample.interface_errors {
                metrics.insert("interface_errors".to_owned(), errors as f64);
            }
        }
        metrics.insert("throughput_in".to_owned(), sample.inbound_mbps);
        metrics.insert("throughput_out".to_owned(), sample.outbound_mbps);
        metrics.insert("throughput_total".to_owned(), sample.total_mbps);

        metrics
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample(device: Uuid, age_secs: i64) -> ThroughputSample {
        ThroughputSample {
            time: Utc::now() - Duration::seconds(age_secs),
            device_id: device,
            total_mbps: 1.5,
            ..ThroughputSample::default()
        }
    }

    #[test]
    fn latest_respects_max_age() {
        let cache = SnapshotCache::new();
        let device = Uuid::new_v4();

        cache.update(sample(device, 60));
        assert!(cache.latest(device, Duration::seconds(30)).is_none());
        assert!(cache.latest(device, Duration::seconds(120)).is_some());
    }

    #[test]
    fn latest_returns_none_for_unknown_device() {
        let cache = SnapshotCache::new();
        assert!(cache.latest(Uuid::new_v4(), Duration::seconds(30)).is_none());
    }

    #[test]
    fn update_replaces_whole_snapshot() {
        let cache = SnapshotCache::new();
        let device = Uuid::new_v4();

        cache.update(sample(device, 10));
        let mut newer = sample(device, 0);
        newer.total_mbps = 9.0;
        cache.update(newer);

        let got = cache.latest(device, Duration::seconds(30)).unwrap();
        assert!((got.total_mbps - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn metrics_map_includes_present_fields_only() {
        let device = Uuid::new_v4();
        let mut s = sample(device, 0);
        s.cpu_data_plane = Some(42.0);
        s.sessions_active = Some(100);
        s.memory_used_pct = None;

        let metrics = SnapshotCache::metrics_for(&s);
        assert!((metrics["cpu"] - 42.0).abs() < f64::EPSILON);
        assert!((metrics["sessions"] - 100.0).abs() < f64::EPSILON);
        assert!(!metrics.contains_key("memory"));
        assert!(metrics.contains_key("throughput_total"));
    }
}

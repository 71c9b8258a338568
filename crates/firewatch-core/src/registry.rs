// Deterministic device identity and the runtime fleet view.
//
// A device's id is a UUIDv5 over a fixed namespace, hashed from its
// management address (and optionally its display name). The same device
// therefore maps to the same id across restarts, config rewrites, and
// restores, keeping historical time-series data attached.

use std::collections::HashMap;
use std::sync::Arc;

use secrecy::SecretString;
use uuid::{Uuid, uuid};

use firewatch_config::{ConfigSnapshot, DeviceEntry, MetadataEntry};

/// Fixed namespace for device ids. Never change this: doing so orphans
/// every row in the store.
const DEVICE_NAMESPACE: Uuid = uuid!("9a1c6f3e-52d4-4f09-b7ad-1e40b1c0f5d2");

/// Derive the deterministic id for a device.
///
/// The address alone determines the id unless a name is supplied; callers
/// that want rename-stable ids pass `None`.
pub fn device_id(address: &str, name: Option<&str>) -> Uuid {
    match name {
        Some(n) if !n.is_empty() => {
            Uuid::new_v5(&DEVICE_NAMESPACE, format!("{address}:{n}").as_bytes())
        }
        _ => Uuid::new_v5(&DEVICE_NAMESPACE, address.as_bytes()),
    }
}

/// Runtime view of one managed firewall.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: Uuid,
    pub address: String,
    pub api_key: SecretString,
    pub name: String,
    pub enabled: bool,
    pub monitored_interface: String,
    pub wan_interface: Option<String>,
}

const DEFAULT_MONITORED_INTERFACE: &str = "ethernet1/1";

impl Device {
    fn from_entry(entry: &DeviceEntry) -> Self {
        Self {
            id: device_id(&entry.address, None),
            address: entry.address.clone(),
            api_key: SecretString::from(entry.api_key.clone()),
            name: entry.name.clone(),
            enabled: entry.enabled,
            monitored_interface: entry
                .monitored_interface
                .clone()
                .unwrap_or_else(|| DEFAULT_MONITORED_INTERFACE.to_owned()),
            wan_interface: entry.wan_interface.clone(),
        }
    }
}

/// The fleet, derived from a configuration snapshot. Disabled devices are
/// retained (their history stays queryable) but excluded from polling.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<Arc<Device>>,
}

impl DeviceRegistry {
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        Self {
            devices: snapshot
                .devices
                .devices
                .iter()
                .map(|e| Arc::new(Device::from_entry(e)))
                .collect(),
        }
    }

    pub fn all(&self) -> &[Arc<Device>] {
        &self.devices
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.iter().filter(|d| d.enabled)
    }

    pub fn get(&self, id: Uuid) -> Option<&Arc<Device>> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Mapping from stored legacy ids to deterministic ids, for the
    /// one-shot migration. Entries already deterministic are omitted.
    pub fn legacy_id_mapping(snapshot: &ConfigSnapshot) -> HashMap<Uuid, Uuid> {
        snapshot
            .devices
            .devices
            .iter()
            .filter_map(|e| {
                let new = device_id(&e.address, None);
                match e.id {
                    Some(old) if old != new => Some((old, new)),
                    _ => None,
                }
            })
            .collect()
    }
}

/// Per-device metadata view with derived tag and location indexes.
///
/// Keys are canonical lowercase MACs. The indexes are computed on
/// construction, not stored.
#[derive(Debug, Clone, Default)]
pub struct MetadataView {
    entries: HashMap<String, MetadataEntry>,
}

impl MetadataView {
    pub fn for_device(snapshot: &ConfigSnapshot, firewall_id: Uuid) -> Self {
        let entries = snapshot
            .metadata
            .metadata
            .get(&firewall_id)
            .map(|per_mac| {
                per_mac
                    .iter()
                    .map(|(mac, entry)| (normalize_mac(mac), entry.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Self { entries }
    }

    pub fn get(&self, mac: &str) -> Option<&MetadataEntry> {
        self.entries.get(&normalize_mac(mac))
    }

    /// MACs carrying the given tag.
    pub fn macs_with_tag(&self, tag: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.tags.iter().any(|t| t == tag))
            .map(|(mac, _)| mac.as_str())
            .collect()
    }

    /// MACs at the given location.
    pub fn macs_at_location(&self, location: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.location.as_deref() == Some(location))
            .map(|(mac, _)| mac.as_str())
            .collect()
    }
}

/// Canonical MAC form: lowercase, colon-separated.
pub fn normalize_mac(raw: &str) -> String {
    raw.to_lowercase().replace('-', ":")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use firewatch_config::{DeviceFile, MetadataFile, Settings};

    fn snapshot_with(devices: Vec<DeviceEntry>) -> ConfigSnapshot {
        ConfigSnapshot {
            settings: Settings::default(),
            devices: DeviceFile { devices },
            metadata: MetadataFile::default(),
        }
    }

    fn entry(address: &str, name: &str) -> DeviceEntry {
        DeviceEntry {
            id: None,
            address: address.into(),
            api_key: "k".into(),
            name: name.into(),
            enabled: true,
            monitored_interface: None,
            wan_interface: None,
        }
    }

    #[test]
    fn device_id_is_deterministic() {
        let a = device_id("192.168.1.1", None);
        let b = device_id("192.168.1.1", None);
        assert_eq!(a, b);

        let c = device_id("192.168.1.1", Some("edge"));
        let d = device_id("192.168.1.1", Some("edge"));
        assert_eq!(c, d);
        assert_ne!(a, c);
    }

    #[test]
    fn device_id_differs_per_address() {
        assert_ne!(device_id("192.168.1.1", None), device_id("192.168.1.2", None));
    }

    #[test]
    fn device_id_survives_reordering() {
        // The id depends only on the device's own attributes, never on
        // list position.
        let snap_a = snapshot_with(vec![entry("10.0.0.1", "a"), entry("10.0.0.2", "b")]);
        let snap_b = snapshot_with(vec![entry("10.0.0.2", "b"), entry("10.0.0.1", "a")]);

        let reg_a = DeviceRegistry::from_snapshot(&snap_a);
        let reg_b = DeviceRegistry::from_snapshot(&snap_b);

        let find = |reg: &DeviceRegistry, addr: &str| {
            reg.all()
                .iter()
                .find(|d| d.address == addr)
                .map(|d| d.id)
                .unwrap()
        };
        assert_eq!(find(&reg_a, "10.0.0.1"), find(&reg_b, "10.0.0.1"));
        assert_eq!(find(&reg_a, "10.0.0.2"), find(&reg_b, "10.0.0.2"));
    }

    #[test]
    fn disabled_devices_are_retained_but_not_polled() {
        let mut e = entry("10.0.0.1", "a");
        e.enabled = false;
        let reg = DeviceRegistry::from_snapshot(&snapshot_with(vec![e, entry("10.0.0.2", "b")]));

        assert_eq!(reg.all().len(), 2);
        assert_eq!(reg.enabled().count(), 1);
    }

    #[test]
    fn legacy_mapping_only_covers_changed_ids() {
        let legacy = Uuid::new_v4();
        let mut changed = entry("10.0.0.1", "a");
        changed.id = Some(legacy);

        let mut stable = entry("10.0.0.2", "b");
        stable.id = Some(device_id("10.0.0.2", None));

        let mapping =
            DeviceRegistry::legacy_id_mapping(&snapshot_with(vec![changed, stable, entry("10.0.0.3", "c")]));

        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping[&legacy], device_id("10.0.0.1", None));
    }

    #[test]
    fn mac_normalization() {
        assert_eq!(normalize_mac("AA-BB-CC-DD-EE-FF"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee:ff"), "aa:bb:cc:dd:ee:ff");
    }
}

// Registry files: versioned JSON envelopes for devices and metadata.
//
// Writes go through a temp file + rename so readers never observe a
// partially written envelope.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::ConfigError;

/// Versioned JSON envelope wrapping every registry file and backup export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: T,
}

pub const ENVELOPE_VERSION: u32 = 2;

impl<T> Envelope<T> {
    pub fn now(payload: T) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// One managed firewall in `devices.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Stored id. Legacy files carry random v4 ids; the deterministic id
    /// derived from the address is authoritative (see the registry).
    pub id: Option<Uuid>,
    /// Management address (IP or hostname).
    pub address: String,
    /// API key for the management interface.
    pub api_key: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Interface measured for throughput.
    pub monitored_interface: Option<String>,
    /// Interface considered the WAN uplink.
    pub wan_interface: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Payload of `devices.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceFile {
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

/// One metadata record, keyed by lowercase MAC in [`MetadataFile`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub custom_name: Option<String>,
    pub comment: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Payload of `device_metadata.json`: firewall id -> MAC -> metadata.
///
/// BTreeMap keeps file output stable across rewrites.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFile {
    #[serde(default)]
    pub metadata: BTreeMap<Uuid, BTreeMap<String, MetadataEntry>>,
}

// ── Read / write ────────────────────────────────────────────────────

/// Read an envelope file; a missing file yields the payload default.
pub fn read_envelope<T>(path: &Path) -> Result<Envelope<T>, ConfigError>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(Envelope::now(T::default()));
    }

    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// Atomically write an envelope file (temp file + rename).
pub fn write_envelope<T: Serialize>(path: &Path, envelope: &Envelope<T>) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(envelope).map_err(|source| ConfigError::Json {
        path: path.display().to_string(),
        source,
    })?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let env: Envelope<DeviceFile> = read_envelope(&dir.path().join("devices.json")).unwrap();
        assert!(env.payload.devices.is_empty());
    }

    #[test]
    fn round_trip_devices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");

        let file = DeviceFile {
            devices: vec![DeviceEntry {
                id: None,
                address: "192.168.1.1".into(),
                api_key: "k".into(),
                name: "edge".into(),
                enabled: true,
                monitored_interface: Some("ethernet1/12".into()),
                wan_interface: Some("ethernet1/1".into()),
            }],
        };
        write_envelope(&path, &Envelope::now(file)).unwrap();

        let back: Envelope<DeviceFile> = read_envelope(&path).unwrap();
        assert_eq!(back.version, ENVELOPE_VERSION);
        assert_eq!(back.payload.devices.len(), 1);
        assert_eq!(back.payload.devices[0].address, "192.168.1.1");
    }

    #[test]
    fn metadata_keys_are_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device_metadata.json");

        let fw = Uuid::new_v4();
        let mut per_mac = BTreeMap::new();
        per_mac.insert(
            "aa:bb:cc:dd:ee:ff".to_owned(),
            MetadataEntry {
                custom_name: Some("printer".into()),
                tags: vec!["office".into()],
                ..MetadataEntry::default()
            },
        );
        let mut metadata = BTreeMap::new();
        metadata.insert(fw, per_mac);

        write_envelope(&path, &Envelope::now(MetadataFile { metadata })).unwrap();

        let back: Envelope<MetadataFile> = read_envelope(&path).unwrap();
        let entry = &back.payload.metadata[&fw]["aa:bb:cc:dd:ee:ff"];
        assert_eq!(entry.custom_name.as_deref(), Some("printer"));
        assert_eq!(entry.tags, vec!["office".to_owned()]);
    }
}

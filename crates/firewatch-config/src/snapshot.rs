// The immutable configuration snapshot and its change-notification handle.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::files::{self, DeviceFile, MetadataFile};
use crate::settings::{self, Settings};
use crate::ConfigError;

/// Locations of the on-disk configuration.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub settings: PathBuf,
    pub devices: PathBuf,
    pub metadata: PathBuf,
}

impl ConfigPaths {
    /// Conventional layout under a data directory.
    pub fn under(data_dir: &std::path::Path) -> Self {
        Self {
            settings: data_dir.join("firewatch.toml"),
            devices: data_dir.join("devices.json"),
            metadata: data_dir.join("device_metadata.json"),
        }
    }
}

/// Everything the collector needs to know about its configuration,
/// loaded at one instant. Immutable; replaced wholesale on reload.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub settings: Settings,
    pub devices: DeviceFile,
    pub metadata: MetadataFile,
}

/// Owner of the live snapshot. Consumers subscribe for change
/// notifications; `reload()` re-reads every file and atomically swaps the
/// published snapshot.
#[derive(Debug)]
pub struct ConfigHandle {
    paths: ConfigPaths,
    tx: watch::Sender<Arc<ConfigSnapshot>>,
}

impl ConfigHandle {
    /// Load all configuration and create the handle.
    pub fn load(paths: ConfigPaths) -> Result<Self, ConfigError> {
        let snapshot = Arc::new(Self::read(&paths)?);
        info!(
            devices = snapshot.devices.devices.len(),
            channels = snapshot.settings.notification_channels.len(),
            "configuration loaded"
        );
        let (tx, _) = watch::channel(snapshot);
        Ok(Self { paths, tx })
    }

    fn read(paths: &ConfigPaths) -> Result<ConfigSnapshot, ConfigError> {
        let settings = settings::load_settings(&paths.settings)?;
        let devices = files::read_envelope::<DeviceFile>(&paths.devices)?.payload;
        let metadata = files::read_envelope::<MetadataFile>(&paths.metadata)?.payload;
        Ok(ConfigSnapshot {
            settings,
            devices,
            metadata,
        })
    }

    /// The current snapshot (cheap `Arc` clone).
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        self.tx.borrow().clone()
    }

    /// Subscribe to snapshot replacements.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ConfigSnapshot>> {
        self.tx.subscribe()
    }

    /// Re-read every file and publish the new snapshot. Readers holding the
    /// previous `Arc` keep a consistent (stale) view until they observe the
    /// change.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let snapshot = Arc::new(Self::read(&self.paths)?);
        info!(devices = snapshot.devices.devices.len(), "configuration reloaded");
        let _ = self.tx.send(snapshot);
        Ok(())
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::files::{DeviceEntry, Envelope};

    #[test]
    fn reload_publishes_new_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::under(dir.path());

        let handle = ConfigHandle::load(paths.clone()).unwrap();
        assert!(handle.current().devices.devices.is_empty());

        let mut rx = handle.subscribe();

        files::write_envelope(
            &paths.devices,
            &Envelope::now(DeviceFile {
                devices: vec![DeviceEntry {
                    id: None,
                    address: "10.0.0.1".into(),
                    api_key: "k".into(),
                    name: "fw".into(),
                    enabled: true,
                    monitored_interface: None,
                    wan_interface: None,
                }],
            }),
        )
        .unwrap();

        handle.reload().unwrap();

        assert!(rx.has_changed().unwrap());
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.devices.devices.len(), 1);
    }
}

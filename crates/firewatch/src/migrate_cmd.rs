// One-shot migration of legacy random device ids to deterministic ids.
//
// Workflow: back up every registry file into a timestamped directory,
// rewrite the database inside a single transaction, then rewrite the
// registry files. A failure at any phase leaves the backup as the
// recovery point and exits nonzero.

use std::path::Path;

use anyhow::{Context, bail};
use chrono::Utc;
use tracing::{info, warn};

use firewatch_config::{ConfigHandle, ConfigPaths, Envelope};
use firewatch_core::{DeviceRegistry, device_id};
use firewatch_store::Store;

pub async fn migrate_device_ids(data_dir: &Path) -> anyhow::Result<()> {
    let paths = ConfigPaths::under(data_dir);
    let config = ConfigHandle::load(paths.clone())?;
    let snapshot = config.current();

    let mapping = DeviceRegistry::legacy_id_mapping(&snapshot);
    if mapping.is_empty() {
        info!("all device ids are already deterministic, nothing to do");
        return Ok(());
    }
    info!(devices = mapping.len(), "legacy device ids found");

    // Phase 1: backup.
    let backup_dir = data_dir.join(format!(
        "migration_backup_{}",
        Utc::now().format("%Y%m%d_%H%M%S")
    ));
    std::fs::create_dir_all(&backup_dir).context("failed to create backup directory")?;
    for file in [&paths.settings, &paths.devices, &paths.metadata] {
        if file.exists() {
            let dest = backup_dir.join(file.file_name().unwrap_or_default());
            std::fs::copy(file, &dest)
                .with_context(|| format!("failed to back up {}", file.display()))?;
        }
    }
    info!(backup = %backup_dir.display(), "registry files backed up");

    // Phase 2: database rewrite (all-or-nothing).
    let dsn = snapshot.settings.database.effective_dsn();
    let store = Store::connect(&dsn, snapshot.devices.devices.len()).await?;
    match store.migrate_device_ids(&mapping).await {
        Ok(stats) => {
            info!(rows = stats.rows_updated, "database migration committed");
        }
        Err(e) => {
            warn!(error = %e, "database migration rolled back");
            bail!(
                "migration failed and was rolled back; registry backup at {}",
                backup_dir.display()
            );
        }
    }

    // Phase 3: rewrite the registry files with deterministic ids.
    let mut devices = snapshot.devices.clone();
    for entry in &mut devices.devices {
        entry.id = Some(device_id(&entry.address, None));
    }
    firewatch_config::files::write_envelope(&paths.devices, &Envelope::now(devices))
        .with_context(|| {
            format!(
                "database migrated but devices.json rewrite failed; backup at {}",
                backup_dir.display()
            )
        })?;

    let mut metadata = snapshot.metadata.clone();
    let remapped: Vec<_> = metadata
        .metadata
        .keys()
        .filter(|k| mapping.contains_key(k))
        .copied()
        .collect();
    for old in remapped {
        if let Some(per_mac) = metadata.metadata.remove(&old) {
            metadata.metadata.insert(mapping[&old], per_mac);
        }
    }
    firewatch_config::files::write_envelope(&paths.metadata, &Envelope::now(metadata))
        .with_context(|| {
            format!(
                "database migrated but device_metadata.json rewrite failed; backup at {}",
                backup_dir.display()
            )
        })?;

    info!("device id migration complete");
    Ok(())
}

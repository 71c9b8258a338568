//! Configuration for the firewatch collector.
//!
//! Three layers compose the runtime configuration:
//!
//! - **Settings** ([`Settings`]) — collector-wide tunables loaded via figment
//!   from `firewatch.toml` plus `FIREWATCH_`-prefixed environment variables:
//!   database coordinates, timezone offset, polling depths, notification
//!   channels, scan limits.
//! - **Registry files** — versioned JSON envelopes holding the managed
//!   device list (`devices.json`) and per-MAC device metadata
//!   (`device_metadata.json`).
//! - **Snapshot** ([`ConfigSnapshot`]) — the immutable combination of the
//!   above, distributed to the collector through a `tokio::sync::watch`
//!   channel so a reload atomically replaces the whole view.

pub mod files;
pub mod settings;
pub mod snapshot;

use thiserror::Error;

pub use files::{DeviceEntry, DeviceFile, Envelope, MetadataEntry, MetadataFile};
pub use settings::{
    ChannelKind, DatabaseSettings, EmailChannel, NotificationChannelConfig, Settings,
    SlackChannel, WebhookChannel,
};
pub use snapshot::{ConfigHandle, ConfigPaths, ConfigSnapshot};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("failed to parse {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

//! Telemetry ingestion and alerting engine.
//!
//! This crate owns the collector's business logic:
//!
//! - **[`registry`]** — deterministic device identity and the runtime view
//!   of the managed fleet, derived from the configuration snapshot.
//! - **[`scheduler`]** — named jobs on interval/daily/weekly/cron cadences
//!   with per-job stats, panic isolation, and bounded shutdown.
//! - **[`collect`]** — the per-device polling pipeline: counter deltas and
//!   rate derivation, connected-device normalization (vendor, reverse DNS,
//!   virtual-MAC heuristics, metadata merge), application and log
//!   collection.
//! - **[`cache`]** — the latest-snapshot cache the read adapter and alert
//!   engine observe; readers always see a complete snapshot.
//! - **[`alerts`]** — threshold evaluation under cooldowns and maintenance
//!   windows, alert templates, metric-aware message formatting.
//! - **[`notify`]** — email/webhook/Slack delivery with bounded retries.
//! - **[`scan`]** — RFC1918-guarded nmap execution, queue lifecycle, and
//!   scan-to-scan change detection.
//! - **[`read`]** — the read-only facade served to the external HTTP layer.

pub mod alerts;
pub mod cache;
pub mod collect;
pub mod error;
pub mod notify;
pub mod read;
pub mod registry;
pub mod scan;
pub mod scheduler;

pub use cache::SnapshotCache;
pub use error::CoreError;
pub use registry::{Device, DeviceRegistry, device_id};
pub use scheduler::{JobOptions, Scheduler, Trigger};

/// Domain model re-exports: the persisted records and shared enums live in
/// the store crate; consumers of the engine get them from here.
pub use firewatch_store::model;

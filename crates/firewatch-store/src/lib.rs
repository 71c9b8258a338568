//! TimescaleDB persistence for the firewatch collector.
//!
//! One shared [`sqlx::PgPool`] backs every repository. The collector process
//! exclusively owns writes to all time-series tables and to the alert
//! cooldown/history tables; the read API adapter only reads.
//!
//! [`schema::ensure_schema`] installs the full schema idempotently:
//! extension, tables, hypertable conversion, indexes, retention and
//! compression policies, continuous aggregates, grants. Everything except
//! extension creation tolerates pre-existing objects and logs instead of
//! aborting.

pub mod alerts;
pub mod applications;
pub mod connected;
pub mod logs;
pub mod migrate;
pub mod model;
pub mod samples;
pub mod scans;
pub mod scheduler_stats;
pub mod schema;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("schema initialization failed: {message}")]
    Schema { message: String },

    #[error("migration failed: {message}")]
    Migration { message: String },
}

/// Outcome of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with the same `(device_id, time)` already existed; nothing
    /// was written.
    Duplicate,
}

/// Handle to the time-series store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect with a pool sized for the fleet:
    /// `min_connections = 2`, `max_connections = device_count + 4`.
    pub async fn connect(dsn: &str, device_count: usize) -> Result<Self, StoreError> {
        let max = u32::try_from(device_count + 4).unwrap_or(u32::MAX).max(2);
        let pool = PgPoolOptions::new()
            .min_connections(2)
            .max_connections(max)
            .connect(dsn)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (used by the migration CLI and tests).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

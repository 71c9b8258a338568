use thiserror::Error;

/// Top-level error for the collector engine.
///
/// Handlers surface these as values to the scheduler, which counts and
/// logs them; no error here can take the scheduler down.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Api(#[from] firewatch_api::Error),

    #[error(transparent)]
    Store(#[from] firewatch_store::StoreError),

    #[error(transparent)]
    Config(#[from] firewatch_config::ConfigError),

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Hard safety rejection: non-RFC1918 scan target or similar. Never
    /// retried, never reaches a subprocess.
    #[error("safety rejection: {0}")]
    Safety(String),

    #[error("scan failed: {0}")]
    Scan(String),

    #[error("notification failed: {0}")]
    Notification(String),
}

use thiserror::Error;

/// Top-level error type for the `firewatch-api` crate.
///
/// Covers every failure mode of a management-API exchange: transport,
/// authentication, API-level errors, and response parsing. The collector
/// maps these into per-job error counts; the retry helper consults
/// [`Error::is_transient`] to decide whether another attempt is worthwhile.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The firewall rejected the API key (401/403 or an auth error reply).
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS configuration or handshake error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── API ─────────────────────────────────────────────────────────
    /// Non-success HTTP status from the management API.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The XML reply carried `status="error"`.
    #[error("operation failed: {message}")]
    Operation { message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// The reply was not parseable as the expected XML shape.
    #[error("malformed response: {message}")]
    Parse { message: String },
}

impl Error {
    /// `true` if this error indicates bad or expired credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// `true` if this is a transient error worth retrying.
    ///
    /// Only transport-level failures (timeout, connect reset, DNS) qualify.
    /// HTTP status errors and API-level errors are deterministic and are
    /// surfaced immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

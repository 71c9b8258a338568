//! Async client for the firewall XML management API.
//!
//! The collector talks to each firewall through [`FirewallClient`], one async
//! method per management operation (`type=op` commands, log queries, report
//! queries). Every method returns the parsed payload wrapped in [`Fetched`],
//! which carries the measured round-trip latency, or a typed [`Error`].
//!
//! Transport concerns (TLS mode for self-signed certificates, per-call
//! timeout) are shared through [`TransportConfig`]. Transient network
//! failures can be retried with [`retry::with_retries`]; HTTP 4xx/5xx and
//! API-level errors are never retried.

pub mod client;
pub mod error;
pub mod retry;
pub mod transport;
pub mod types;

pub(crate) mod xml;

pub use client::{Fetched, FirewallClient};
pub use error::Error;
pub use transport::{TlsMode, TransportConfig};

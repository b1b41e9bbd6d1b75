//! Error types for event actions.
//!
//! [`ActionError`] covers the action lifecycle (construction and submission).
//! [`DeliveryError`] covers a single delivery attempt; these never escape the
//! action and are absorbed by the retry controller and failure policy.

use std::net::Ipv4Addr;
use thiserror::Error;

/// Action lifecycle error type.
#[derive(Error, Debug)]
pub enum ActionError {
    /// Invalid action configuration. No workers were started.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The action was constructed outside of a Tokio runtime.
    #[error("No Tokio runtime available: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),

    /// The action has been stopped and no longer accepts events.
    #[error("Action stopped")]
    Stopped,
}

/// Result type alias using ActionError.
pub type ActionResult<T> = Result<T, ActionError>;

/// Failure of a single delivery attempt.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// DNS lookup of the sink host failed.
    #[error("Failed to resolve {host}: {source}")]
    Resolve {
        /// Hostname that was looked up.
        host: String,
        /// Underlying resolver error.
        #[source]
        source: std::io::Error,
    },

    /// The sink host has no IPv4 address to connect to.
    #[error("No IPv4 address found for {0}")]
    NoIpv4Address(String),

    /// The resolved address falls in a private or reserved range.
    #[error("Cannot send webhook POST to address: {host} ({addr})")]
    UnsafeTarget {
        /// Hostname from the configured URL.
        host: String,
        /// The resolved address that was rejected.
        addr: Ipv4Addr,
    },

    /// Connection, TLS, or timeout failure from the HTTP client.
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The sink answered with a non-2xx status.
    #[error("Failed with status={status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, kept for diagnostics.
        body: String,
    },

    /// The batch could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The action was stopped before an attempt could be made.
    #[error("Delivery abandoned: action stopped")]
    Stopped,
}

/// Result type alias using DeliveryError.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

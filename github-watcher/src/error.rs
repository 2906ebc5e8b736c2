/*!
Error taxonomy for the watcher
*/

use thiserror::Error;

/// Missing or invalid settings. Surfaced synchronously and blocks the
/// transition that triggered validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("GitHub token is required")]
    MissingToken,

    #[error("poll interval must be greater than zero (got {0})")]
    NonPositiveInterval(i64),

    #[error("malformed configuration payload: {0}")]
    Malformed(String),

    #[error("could not read configuration file {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// Failure of a single remote read. The polling engine treats any of these
/// as "no data this cycle" for the affected resource.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{url} answered with status {status}")]
    Status { status: u16, url: String },

    #[error("could not decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

/// A sink refused or failed to deliver an alert. Logged, never retried.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("sink rejected the alert: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode alert: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{failed} of {total} sinks failed")]
    Partial { failed: usize, total: usize },
}

/// Errors returned by lifecycle operations.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

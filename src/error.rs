//! Error type shared by the sink and configuration APIs.

use std::path::PathBuf;
use std::time::Duration;

/// Errors surfaced to callers of the public API.
///
/// Failures inside the capture pipeline itself (a closed channel, a lost completion signal)
/// are logged and never reach the HTTP client, so they have no variant here.
#[derive(Debug, thiserror::Error)]
pub enum AccessLogError {
    /// `pop` was called on an empty queue configured not to wait.
    #[error("no access event available")]
    QueueEmpty,
    /// `pop` waited for the configured bound without seeing an event.
    #[error("timed out after {0:?} waiting for an access event")]
    QueueTimeout(Duration),
    /// An explicitly configured file does not exist.
    #[error("access log configuration not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    /// The file extension is not one of `toml`, `yaml` or `yml`.
    #[error("unsupported access log configuration format: {}", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("invalid access log configuration: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl From<figment::Error> for AccessLogError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

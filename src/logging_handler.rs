//! Access log appender backed by `tracing`.
//!
//! [`LoggingHandler`] writes each [`AccessEvent`] as one structured `tracing` record whose
//! message is an NCSA-style access log line. Installing a subscriber is left to the binary.

use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::{types::AccessEvent, AccessEventHandler};

/// Layout of the message line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `host - user [time] "request" status bytes`
    #[default]
    Common,
    /// The common line followed by the quoted referer and user agent.
    Combined,
}

/// [`AccessEventHandler`] that logs events through `tracing` under the `access_log` target.
///
/// Besides the formatted line, every record carries the event id, method, URI, status,
/// content length, elapsed milliseconds and thread name as fields, so JSON subscribers get them
/// without parsing the message.
///
/// # Examples
///
/// ```rust,no_run
/// use access_event::{AccessLogConfig, AccessLogLayer, LogFormat, LoggingHandler};
///
/// # #[tokio::main]
/// # async fn main() {
/// let layer = AccessLogLayer::new(
///     AccessLogConfig::default(),
///     LoggingHandler::new(LogFormat::Combined),
/// );
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct LoggingHandler {
    format: LogFormat,
}

impl LoggingHandler {
    pub fn new(format: LogFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// The message line for `event` in this handler's format.
    pub fn render(&self, event: &AccessEvent) -> String {
        match self.format {
            LogFormat::Common => event.common_log_line(),
            LogFormat::Combined => event.combined_log_line(),
        }
    }
}

impl AccessEventHandler for LoggingHandler {
    async fn handle_event(&self, event: Arc<AccessEvent>) {
        info!(
            target: "access_log",
            id = %event.id,
            method = %event.method,
            uri = %event.request_uri,
            status = event.status.as_u16(),
            content_length = event.content_length,
            elapsed_ms = event.elapsed_time_millis(),
            thread = %event.thread_name,
            "{}",
            self.render(&event)
        );
    }
}

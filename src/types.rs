//! Data types for captured HTTP exchanges.
//!
//! [`AccessEvent`] is the record produced for every completed request/response pair. It is
//! built once by [`crate::builder::build_event`] and handed to sinks behind an `Arc`, so it
//! never changes after dispatch.

use axum::http::{header, HeaderMap, Method, StatusCode};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::{Duration, SystemTime};

/// Placeholder written for values the server could not determine.
pub const NOT_AVAILABLE: &str = "-";

/// A structured record of one completed HTTP exchange.
///
/// # Examples
///
/// ```rust
/// use access_event::types::AccessEvent;
/// use axum::http::{Method, StatusCode};
/// use std::time::Duration;
///
/// let mut event = AccessEvent::new(Method::GET, "/text", StatusCode::OK);
/// event.query_string = "?query".to_string();
/// event.elapsed = Duration::from_millis(1_250);
///
/// assert_eq!(event.request_url(), "GET /text?query HTTP/1.1");
/// assert_eq!(event.elapsed_time_millis(), 1_250);
/// assert_eq!(event.elapsed_seconds(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct AccessEvent {
    /// Unique identifier of the exchange within this process
    pub id: u64,
    /// When the request entered the middleware
    pub timestamp: SystemTime,
    /// HTTP method (GET, POST, etc.)
    pub method: Method,
    /// Request path without the query string
    pub request_uri: String,
    /// Raw query string prefixed with `?`, or empty when the request had none
    pub query_string: String,
    /// Protocol from the request line, e.g. `HTTP/1.1`
    pub protocol: String,
    /// Request headers; lookups are case-insensitive and keep every value in arrival order
    pub request_headers: HeaderMap,
    /// Decoded query parameters in arrival order
    pub request_parameters: Vec<(String, String)>,
    /// Peer IP address, or `-` when the server did not expose it
    pub remote_addr: String,
    /// Peer host; no reverse lookup is performed, so this mirrors `remote_addr`
    pub remote_host: String,
    /// Authenticated user, if an upstream layer attached one
    pub remote_user: Option<String>,
    /// Host name the client addressed
    pub server_name: String,
    /// Port the client addressed
    pub local_port: u16,
    /// HTTP status code (200, 404, 500, etc.)
    pub status: StatusCode,
    /// Response headers as produced by the handler
    pub response_headers: HeaderMap,
    /// Declared `Content-Length`, or the number of body bytes actually written
    pub content_length: u64,
    /// Time from request entry until the response body finished
    pub elapsed: Duration,
    /// Name of the thread that completed the response
    pub thread_name: String,
    /// Request body bytes, when request capture is enabled
    pub request_content: Option<Bytes>,
    /// Response body bytes, when response capture is enabled
    pub response_content: Option<Bytes>,
}

impl AccessEvent {
    /// Creates an event with the given request line and status, every other field defaulted.
    ///
    /// Mostly useful for handler tests; the middleware builds events through
    /// [`crate::builder::build_event`].
    pub fn new(method: Method, request_uri: impl Into<String>, status: StatusCode) -> Self {
        Self {
            id: 0,
            timestamp: SystemTime::now(),
            method,
            request_uri: request_uri.into(),
            query_string: String::new(),
            protocol: "HTTP/1.1".to_string(),
            request_headers: HeaderMap::new(),
            request_parameters: Vec::new(),
            remote_addr: NOT_AVAILABLE.to_string(),
            remote_host: NOT_AVAILABLE.to_string(),
            remote_user: None,
            server_name: NOT_AVAILABLE.to_string(),
            local_port: 0,
            status,
            response_headers: HeaderMap::new(),
            content_length: 0,
            elapsed: Duration::ZERO,
            thread_name: String::new(),
            request_content: None,
            response_content: None,
        }
    }

    pub fn elapsed_time_millis(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }

    /// Whole seconds, derived from the millisecond value so both always agree.
    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_time_millis() / 1000
    }

    /// The request line, e.g. `GET /text?query HTTP/1.1`.
    pub fn request_url(&self) -> String {
        format!(
            "{} {}{} {}",
            self.method, self.request_uri, self.query_string, self.protocol
        )
    }

    /// First value of a request header, if it is valid visible ASCII.
    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    /// Every value of a request header, in arrival order.
    pub fn request_header_values(&self, name: &str) -> Vec<&str> {
        self.request_headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect()
    }

    /// First value of a response header, if it is valid visible ASCII.
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    /// Every value supplied for a query parameter, in arrival order.
    pub fn request_parameter_values(&self, name: &str) -> Vec<&str> {
        self.request_parameters
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    /// NCSA common log format line.
    pub fn common_log_line(&self) -> String {
        let timestamp: DateTime<Utc> = self.timestamp.into();
        format!(
            "{} - {} [{}] \"{}\" {} {}",
            self.remote_host,
            self.remote_user.as_deref().unwrap_or(NOT_AVAILABLE),
            timestamp.format("%d/%b/%Y:%H:%M:%S %z"),
            self.request_url(),
            self.status.as_u16(),
            self.content_length,
        )
    }

    /// NCSA combined log format line: the common line plus referer and user agent.
    pub fn combined_log_line(&self) -> String {
        format!(
            "{} \"{}\" \"{}\"",
            self.common_log_line(),
            self.request_header(header::REFERER.as_str())
                .unwrap_or(NOT_AVAILABLE),
            self.request_header(header::USER_AGENT.as_str())
                .unwrap_or(NOT_AVAILABLE),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn sample_event() -> AccessEvent {
        let mut event = AccessEvent::new(Method::GET, "/text", StatusCode::OK);
        event.timestamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        event.remote_addr = "127.0.0.1".to_string();
        event.remote_host = "127.0.0.1".to_string();
        event.content_length = 4;
        event
    }

    #[test]
    fn test_elapsed_representations_agree() {
        let mut event = sample_event();
        for millis in [0, 999, 1_000, 1_999, 61_500] {
            event.elapsed = Duration::from_millis(millis);
            assert_eq!(event.elapsed_time_millis(), millis);
            assert_eq!(event.elapsed_seconds(), millis / 1000);
        }
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut event = sample_event();
        event
            .request_headers
            .append("x-test-header", HeaderValue::from_static("one"));
        event
            .request_headers
            .append("x-test-header", HeaderValue::from_static("two"));

        assert_eq!(event.request_header("X-Test-Header"), Some("one"));
        assert_eq!(
            event.request_header_values("X-TEST-HEADER"),
            vec!["one", "two"]
        );
        assert_eq!(event.response_header("X-Test-Header"), None);
    }

    #[test]
    fn test_parameter_values_keep_order() {
        let mut event = sample_event();
        event.request_parameters = vec![
            ("param".to_string(), "value1".to_string()),
            ("other".to_string(), "x".to_string()),
            ("param".to_string(), "value2".to_string()),
        ];
        assert_eq!(
            event.request_parameter_values("param"),
            vec!["value1", "value2"]
        );
        assert!(event.request_parameter_values("missing").is_empty());
    }

    #[test]
    fn test_common_log_line() {
        let event = sample_event();
        assert_eq!(
            event.common_log_line(),
            "127.0.0.1 - - [14/Nov/2023:22:13:20 +0000] \"GET /text HTTP/1.1\" 200 4"
        );
    }

    #[test]
    fn test_combined_log_line_includes_agent() {
        let mut event = sample_event();
        event.remote_user = Some("alice".to_string());
        event
            .request_headers
            .insert(header::USER_AGENT, HeaderValue::from_static("curl/8.0"));
        assert_eq!(
            event.combined_log_line(),
            "127.0.0.1 - alice [14/Nov/2023:22:13:20 +0000] \"GET /text HTTP/1.1\" 200 4 \"-\" \"curl/8.0\""
        );
    }
}

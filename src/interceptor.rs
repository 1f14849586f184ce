//! Request and response snapshots taken at the server boundary.
//!
//! [`RequestSnapshot::capture`] runs when a request enters the middleware and
//! [`ResponseSnapshot::capture`] when the inner service hands back its response. Completion of
//! the response is signalled separately by the body observer in [`crate::body_wrapper`].

use axum::extract::ConnectInfo;
use axum::http::{header, uri::Authority, HeaderMap, Method, Request, Response, StatusCode, Uri, Version};
use percent_encoding::percent_decode_str;
use std::{
    net::SocketAddr,
    time::{Instant, SystemTime},
};

/// Request extension naming the authenticated user.
///
/// Authentication layers insert this so the access event can report who made the request.
///
/// ```rust
/// use access_event::interceptor::RemoteUser;
/// use axum::http::Request;
///
/// let mut request = Request::new(());
/// request.extensions_mut().insert(RemoteUser("alice".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUser(pub String);

/// Fields captured from a request before it reaches the inner service.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub id: u64,
    pub timestamp: SystemTime,
    /// Monotonic start point for the elapsed time
    pub started: Instant,
    pub method: Method,
    pub request_uri: String,
    pub query_string: String,
    pub parameters: Vec<(String, String)>,
    pub protocol: String,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
    pub remote_user: Option<String>,
    pub server_name: Option<String>,
    pub server_port: Option<u16>,
}

impl RequestSnapshot {
    pub fn capture<B>(request: &Request<B>, id: u64) -> Self {
        let uri = request.uri();
        let authority = server_authority(request.headers(), uri);
        let server_port = authority.as_ref().map(|authority| {
            authority
                .port_u16()
                .unwrap_or_else(|| default_port(uri))
        });

        Self {
            id,
            timestamp: SystemTime::now(),
            started: Instant::now(),
            method: request.method().clone(),
            request_uri: uri.path().to_owned(),
            query_string: match uri.query() {
                Some(query) if !query.is_empty() => format!("?{query}"),
                _ => String::new(),
            },
            parameters: uri.query().map(parse_query).unwrap_or_default(),
            protocol: protocol_name(request.version()).to_owned(),
            headers: request.headers().clone(),
            remote_addr: request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
            remote_user: request
                .extensions()
                .get::<RemoteUser>()
                .map(|user| user.0.clone()),
            server_name: authority.map(|authority| authority.host().to_owned()),
            server_port,
        }
    }
}

/// Fields captured from the response head.
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseSnapshot {
    pub fn capture<B>(response: &Response<B>) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
        }
    }

    /// Snapshot recorded when the inner service failed without producing a response.
    pub fn failed() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            headers: HeaderMap::new(),
        }
    }
}

/// `Host` header first, then the authority of an absolute-form request target.
fn server_authority(headers: &HeaderMap, uri: &Uri) -> Option<Authority> {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .and_then(|host| host.parse::<Authority>().ok())
        .or_else(|| uri.authority().cloned())
}

fn default_port(uri: &Uri) -> u16 {
    match uri.scheme_str() {
        Some("https") => 443,
        _ => 80,
    }
}

fn protocol_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => crate::types::NOT_AVAILABLE,
    }
}

/// Splits an `application/x-www-form-urlencoded` query into decoded pairs.
///
/// A key without `=` gets an empty value; undecodable UTF-8 is replaced lossily.
pub(crate) fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

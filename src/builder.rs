//! Assembly of [`AccessEvent`]s from captured request and response state.

use axum::http::{header, HeaderMap};

use crate::body_wrapper::BodySummary;
use crate::interceptor::{RequestSnapshot, ResponseSnapshot};
use crate::types::{AccessEvent, NOT_AVAILABLE};

/// Builds the access event for one finished exchange.
///
/// The content length is the declared `Content-Length` header when the handler set a parseable
/// one, and otherwise the number of body bytes actually written (so `0` for bodyless
/// responses). The thread name is the one that observed the end of the response body.
pub fn build_event(
    request: RequestSnapshot,
    response: ResponseSnapshot,
    response_body: BodySummary,
    request_body: Option<BodySummary>,
) -> AccessEvent {
    let remote_addr = request
        .remote_addr
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_owned());
    let content_length =
        declared_content_length(&response.headers).unwrap_or(response_body.bytes_written);

    AccessEvent {
        id: request.id,
        timestamp: request.timestamp,
        method: request.method,
        request_uri: request.request_uri,
        query_string: request.query_string,
        protocol: request.protocol,
        request_headers: request.headers,
        request_parameters: request.parameters,
        remote_host: remote_addr.clone(),
        remote_addr,
        remote_user: request.remote_user,
        server_name: request
            .server_name
            .unwrap_or_else(|| NOT_AVAILABLE.to_owned()),
        local_port: request.server_port.unwrap_or(0),
        status: response.status,
        response_headers: response.headers,
        content_length,
        elapsed: response_body
            .finished
            .saturating_duration_since(request.started),
        thread_name: response_body.thread_name,
        request_content: request_body.and_then(|body| body.content),
        response_content: response_body.content,
    }
}

/// The `Content-Length` response header, if present and a valid integer.
pub fn declared_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

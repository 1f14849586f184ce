//! Shared routes and assertions for the integration tests.
#![allow(dead_code)]

use access_event::{AccessEvent, AccessLogLayer};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};
use tokio::{net::TcpListener, sync::oneshot, time::sleep};

pub const TEXT_RESOURCE_PATH: &str = "/text-resource";

/// In-memory text resource backing the CRUD routes.
#[derive(Clone, Default)]
pub struct TextResource {
    text: Arc<Mutex<String>>,
}

async fn get_text() -> &'static str {
    "text"
}

/// Completes the response from a separate OS thread.
async fn get_text_async() -> String {
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let _ = tx.send("text".to_string());
    });
    rx.await.unwrap_or_default()
}

async fn get_text_with_header() -> impl IntoResponse {
    ([("X-Test-Header", "header")], "text")
}

async fn get_text_with_length() -> impl IntoResponse {
    ([(header::CONTENT_LENGTH, "4")], "text")
}

async fn get_json() -> Json<serde_json::Value> {
    Json(json!({ "json-key": "json-value" }))
}

/// Chunked response without a declared length.
async fn get_stream() -> Body {
    Body::from_stream(futures::stream::iter(vec![
        Ok::<_, std::convert::Infallible>(Bytes::from("chunk1")),
        Ok(Bytes::from("chunk2")),
        Ok(Bytes::from("chunk3")),
    ]))
}

async fn get_slow() -> &'static str {
    sleep(Duration::from_millis(100)).await;
    "slow"
}

async fn read_resource(State(resource): State<TextResource>) -> String {
    resource.text.lock().unwrap().clone()
}

async fn put_resource(State(resource): State<TextResource>, body: String) -> String {
    let mut text = resource.text.lock().unwrap();
    *text = body;
    text.clone()
}

async fn post_resource(State(resource): State<TextResource>, body: String) -> String {
    let mut text = resource.text.lock().unwrap();
    text.push_str(&body);
    text.clone()
}

async fn delete_resource(State(resource): State<TextResource>) -> StatusCode {
    resource.text.lock().unwrap().clear();
    StatusCode::NO_CONTENT
}

/// Router with every test route, wrapped in `layer`.
pub fn test_app(layer: AccessLogLayer) -> Router {
    Router::new()
        .route("/text", get(get_text))
        .route("/text-async", get(get_text_async))
        .route("/text-with-header", get(get_text_with_header))
        .route("/text-with-length", get(get_text_with_length))
        .route("/json", get(get_json))
        .route("/stream", get(get_stream))
        .route("/slow", get(get_slow))
        .route(
            TEXT_RESOURCE_PATH,
            get(read_resource)
                .put(put_resource)
                .post(post_resource)
                .delete(delete_resource),
        )
        .with_state(TextResource::default())
        .layer(layer)
}

/// Serves `app` on an ephemeral localhost port with peer addresses exposed.
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

/// Fluent assertions over an [`AccessEvent`].
pub struct EventAssert<'a> {
    actual: &'a AccessEvent,
}

pub fn assert_event(actual: &AccessEvent) -> EventAssert<'_> {
    EventAssert { actual }
}

impl<'a> EventAssert<'a> {
    pub fn has_timestamp_between(self, start: SystemTime, end: SystemTime) -> Self {
        assert!(
            self.actual.timestamp >= start && self.actual.timestamp <= end,
            "timestamp {:?} not within [{start:?}, {end:?}]",
            self.actual.timestamp
        );
        self
    }

    pub fn has_server_name(self, expected: &str) -> Self {
        assert_eq!(self.actual.server_name, expected);
        self
    }

    pub fn has_local_port(self, expected: u16) -> Self {
        assert_eq!(self.actual.local_port, expected);
        self
    }

    pub fn has_remote_addr(self, expected: &str) -> Self {
        assert_eq!(self.actual.remote_addr, expected);
        self
    }

    pub fn has_remote_host(self, expected: &str) -> Self {
        assert_eq!(self.actual.remote_host, expected);
        self
    }

    pub fn has_remote_user(self, expected: Option<&str>) -> Self {
        assert_eq!(self.actual.remote_user.as_deref(), expected);
        self
    }

    pub fn has_protocol(self, expected: &str) -> Self {
        assert_eq!(self.actual.protocol, expected);
        self
    }

    pub fn has_method(self, expected: &str) -> Self {
        assert_eq!(self.actual.method.as_str(), expected);
        self
    }

    pub fn has_request_uri(self, expected: &str) -> Self {
        assert_eq!(self.actual.request_uri, expected);
        self
    }

    pub fn has_query_string(self, expected: &str) -> Self {
        assert_eq!(self.actual.query_string, expected);
        self
    }

    pub fn has_request_url(self, method: &str, uri: &str, protocol: &str) -> Self {
        assert_eq!(
            self.actual.request_url(),
            format!("{method} {uri} {protocol}")
        );
        self
    }

    pub fn has_status(self, expected: StatusCode) -> Self {
        assert_eq!(self.actual.status, expected);
        self
    }

    pub fn has_content_length(self, expected: u64) -> Self {
        assert_eq!(self.actual.content_length, expected);
        self
    }

    /// Elapsed time fits inside the interval the caller observed.
    pub fn has_elapsed_time_within(self, start: SystemTime, end: SystemTime) -> Self {
        let observed = end.duration_since(start).unwrap_or_default();
        assert!(
            self.actual.elapsed <= observed,
            "elapsed {:?} exceeds observed {observed:?}",
            self.actual.elapsed
        );
        self
    }

    pub fn has_elapsed_seconds_within(self, start: SystemTime, end: SystemTime) -> Self {
        let observed = end.duration_since(start).unwrap_or_default();
        assert_eq!(
            self.actual.elapsed_seconds(),
            self.actual.elapsed_time_millis() / 1000
        );
        assert!(self.actual.elapsed_seconds() <= observed.as_secs());
        self
    }

    pub fn has_thread_name(self) -> Self {
        assert!(!self.actual.thread_name.is_empty(), "thread name is empty");
        self
    }

    pub fn has_request_header(self, name: &str, expected: &str) -> Self {
        assert_eq!(self.actual.request_header(name), Some(expected));
        self
    }

    pub fn has_response_header(self, name: &str, expected: &str) -> Self {
        assert_eq!(self.actual.response_header(name), Some(expected));
        self
    }

    pub fn has_request_parameter(self, name: &str, expected: &[&str]) -> Self {
        assert_eq!(self.actual.request_parameter_values(name), expected);
        self
    }
}

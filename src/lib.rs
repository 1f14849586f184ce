//! # access-event
//!
//! An Axum middleware that turns every HTTP request/response exchange into a structured
//! [`AccessEvent`] and relays it to a background task for delivery to one or more sinks.
//!
//! ## Features
//!
//! - **Completion-aware**: an event is produced once the response body has been fully written,
//!   so handlers that finish their work on another task or thread are measured correctly
//! - **Accurate content length**: the declared `Content-Length` when present, otherwise the
//!   bytes actually written
//! - **Background delivery**: events reach sinks in completion order without blocking responses
//! - **Pluggable sinks**: log through `tracing`, drain in-memory queues, or implement
//!   [`AccessEventHandler`] yourself
//! - **File-driven wiring**: [`config::auto_configure`] builds the layer from a TOML or YAML file
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use access_event::{queue::EventQueue, AccessLogConfig, AccessLogLayer};
//! use axum::{routing::get, Router};
//! use std::net::SocketAddr;
//!
//! async fn text() -> &'static str {
//!     "text"
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let queue = EventQueue::new();
//!     let layer = AccessLogLayer::new(AccessLogConfig::default(), queue.clone());
//!
//!     let app = Router::new().route("/text", get(text)).layer(layer);
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await.unwrap();
//!     tokio::spawn(async move {
//!         axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
//!             .await
//!             .unwrap();
//!     });
//!
//!     // ... issue a request, then:
//!     let event = queue.pop().await.unwrap();
//!     println!("{}", event.common_log_line());
//! }
//! ```
//!
//! ## Custom Handlers
//!
//! ```rust
//! use access_event::{AccessEvent, AccessEventHandler};
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct SlowRequestHandler;
//!
//! impl AccessEventHandler for SlowRequestHandler {
//!     async fn handle_event(&self, event: Arc<AccessEvent>) {
//!         if event.elapsed_time_millis() > 1000 {
//!             println!("SLOW: {}", event.request_url());
//!         }
//!     }
//! }
//! ```

use axum::{body::Body, extract::Request, response::Response};
use serde::Deserialize;
use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::SystemTime,
};
use tokio::sync::{mpsc, oneshot};
use tower::{Layer, Service};
use tracing::{debug, error, instrument};

pub mod body_wrapper;
use body_wrapper::{BodySummary, ObservedBody};

pub mod builder;
use builder::build_event;

pub mod config;

pub mod error;
pub use error::AccessLogError;

pub mod interceptor;
pub use interceptor::RemoteUser;
use interceptor::{RequestSnapshot, ResponseSnapshot};

pub mod logging_handler;
pub use logging_handler::{LogFormat, LoggingHandler};

pub mod multi_handler;
pub use multi_handler::MultiHandler;

pub mod queue;

pub mod types;
pub use types::AccessEvent;

/// Global atomic counter for event ids and process start timestamp
static EVENT_COUNTER: AtomicU64 = AtomicU64::new(1);
static PROCESS_START_TIME: std::sync::OnceLock<u64> = std::sync::OnceLock::new();

/// Generate a unique event id combining process start time and counter
fn generate_event_id() -> u64 {
    let start_time = *PROCESS_START_TIME.get_or_init(|| {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    });

    let counter = EVENT_COUNTER.fetch_add(1, Ordering::Relaxed);

    // High 32 bits: process start timestamp, Low 32 bits: counter
    (start_time << 32) | (counter & 0xFFFFFFFF)
}

/// Configuration for the access log middleware.
///
/// Controls whether body contents are copied onto the event. Byte counts are always taken.
///
/// # Examples
///
/// ```rust
/// use access_event::AccessLogConfig;
///
/// // Default configuration: no body capture
/// let config = AccessLogConfig::default();
///
/// // Keep the response body on each event
/// let config = AccessLogConfig {
///     capture_request_body: false,
///     capture_response_body: true,
/// };
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AccessLogConfig {
    /// Whether to copy request bodies onto the event
    #[serde(default)]
    pub capture_request_body: bool,
    /// Whether to copy response bodies onto the event
    #[serde(default)]
    pub capture_response_body: bool,
}

/// Trait for consuming finished access events.
///
/// Handlers run on the middleware's background task, one event at a time and in completion
/// order, so a slow handler delays later events but never the HTTP response.
pub trait AccessEventHandler: Send + Sync + 'static {
    /// Handle one completed exchange.
    ///
    /// The event is shared with every other configured handler and must be treated as
    /// read-only.
    fn handle_event(&self, event: Arc<AccessEvent>) -> impl std::future::Future<Output = ()> + Send;
}

impl<H: AccessEventHandler> AccessEventHandler for Arc<H> {
    fn handle_event(&self, event: Arc<AccessEvent>) -> impl std::future::Future<Output = ()> + Send {
        self.as_ref().handle_event(event)
    }
}

/// Tower layer for the access log middleware.
///
/// The layer spawns a background task that hands each finished [`AccessEvent`] to the provided
/// [`AccessEventHandler`]. It must therefore be created inside a Tokio runtime.
///
/// # Examples
///
/// ```rust,no_run
/// use access_event::{AccessLogConfig, AccessLogLayer, LoggingHandler};
/// use axum::{routing::get, Router};
///
/// # async fn hello() -> &'static str { "Hello" }
/// # #[tokio::main]
/// # async fn main() {
/// let layer = AccessLogLayer::new(AccessLogConfig::default(), LoggingHandler::default());
///
/// let app: Router = Router::new()
///     .route("/hello", get(hello))
///     .layer(layer);
/// # }
/// ```
#[derive(Clone)]
pub struct AccessLogLayer {
    config: AccessLogConfig,
    tx: mpsc::UnboundedSender<Arc<AccessEvent>>,
}

impl AccessLogLayer {
    /// Create a new layer with the given configuration and handler.
    ///
    /// This spawns the background task that runs the handler.
    pub fn new<H: AccessEventHandler>(config: AccessLogConfig, handler: H) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Arc<AccessEvent>>();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler.handle_event(event).await;
            }
            debug!("Access event channel closed, dispatcher exiting");
        });

        Self { config, tx }
    }

    pub fn config(&self) -> &AccessLogConfig {
        &self.config
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService {
            inner,
            config: self.config.clone(),
            tx: self.tx.clone(),
        }
    }
}

/// Tower service implementation for the access log middleware.
///
/// The service snapshots the request, calls the inner service, wraps the response body in an
/// [`ObservedBody`] and, once that body reports completion, builds and dispatches the event.
/// Users typically don't interact with this type directly - it's created by
/// [`AccessLogLayer`].
#[derive(Clone)]
pub struct AccessLogService<S> {
    inner: S,
    config: AccessLogConfig,
    tx: mpsc::UnboundedSender<Arc<AccessEvent>>,
}

impl<S> Service<Request> for AccessLogService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    #[instrument(skip_all)]
    fn call(&mut self, mut request: Request) -> Self::Future {
        let event_id = generate_event_id();
        let request_snapshot = RequestSnapshot::capture(&request, event_id);

        debug!(
            event_id = %event_id,
            method = %request_snapshot.method,
            uri = %request_snapshot.request_uri,
            "Captured request snapshot"
        );

        let request_completion = if self.config.capture_request_body {
            let body = std::mem::replace(request.body_mut(), Body::empty());
            let (observed, completion) = ObservedBody::new(body, true);
            *request.body_mut() = Body::new(observed);
            Some(completion)
        } else {
            None
        };

        let capture_response_body = self.config.capture_response_body;
        let tx = self.tx.clone();
        let future = self.inner.call(request);

        Box::pin(async move {
            match future.await {
                Ok(mut response) => {
                    let response_snapshot = ResponseSnapshot::capture(&response);
                    let body = std::mem::replace(response.body_mut(), Body::empty());
                    let (observed, response_completion) =
                        ObservedBody::new(body, capture_response_body);
                    *response.body_mut() = Body::new(observed);
                    debug!(event_id = %event_id, status = %response_snapshot.status, "Response body wrapped");

                    // Outlives the response; resolves when the body finishes.
                    tokio::spawn(dispatch_on_completion(
                        tx,
                        request_snapshot,
                        response_snapshot,
                        response_completion,
                        request_completion,
                    ));

                    Ok(response)
                }
                Err(e) => {
                    error!(event_id = %event_id, error = %e, "Inner service failed");
                    let event = build_event(
                        request_snapshot,
                        ResponseSnapshot::failed(),
                        BodySummary::unsent(),
                        None,
                    );
                    send_event(&tx, event);
                    Err(e)
                }
            }
        })
    }
}

async fn dispatch_on_completion(
    tx: mpsc::UnboundedSender<Arc<AccessEvent>>,
    request: RequestSnapshot,
    response: ResponseSnapshot,
    response_completion: oneshot::Receiver<BodySummary>,
    request_completion: Option<oneshot::Receiver<BodySummary>>,
) {
    let event_id = request.id;
    let response_body = match response_completion.await {
        Ok(summary) => summary,
        Err(e) => {
            error!(event_id = %event_id, error = %e, "Response body completion was lost");
            return;
        }
    };
    debug!(
        event_id = %event_id,
        outcome = ?response_body.outcome,
        bytes = response_body.bytes_written,
        "Response completed"
    );

    let request_body = match request_completion {
        Some(completion) => completion.await.ok(),
        None => None,
    };

    send_event(&tx, build_event(request, response, response_body, request_body));
}

fn send_event(tx: &mpsc::UnboundedSender<Arc<AccessEvent>>, event: AccessEvent) {
    let event_id = event.id;
    if tx.send(Arc::new(event)).is_err() {
        error!(event_id = %event_id, "Failed to send access event to background task");
    }
}

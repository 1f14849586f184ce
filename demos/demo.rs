use access_event::{
    config::{auto_configure, AccessLogSettings},
    queue::NamedEventQueues,
    AccessEvent, RemoteUser,
};
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::{env, net::SocketAddr, time::Duration};
use tokio::{net::TcpListener, time::sleep};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Queue a `kind = "queue"` appender can name to make events visible on `/recent`.
const RECENT_QUEUE: &str = "recent";

async fn hello_handler() -> impl IntoResponse {
    sleep(Duration::from_millis(100)).await;
    "Hello, World!"
}

async fn echo_handler(body: Bytes) -> impl IntoResponse {
    sleep(Duration::from_millis(50)).await;
    format!("Echo: {}", String::from_utf8_lossy(&body))
}

async fn streaming_handler() -> impl IntoResponse {
    use futures::stream;
    use tokio::time::interval;

    let stream = stream::unfold(0u32, |count| async move {
        if count >= 5 {
            None
        } else {
            let mut interval = interval(Duration::from_millis(200));
            interval.tick().await;
            Some((
                Ok::<_, std::convert::Infallible>(Bytes::from(format!("chunk-{count}\n"))),
                count + 1,
            ))
        }
    });

    ([("content-type", "text/plain")], Body::from_stream(stream))
}

fn summarize(event: &AccessEvent) -> serde_json::Value {
    json!({
        "id": event.id,
        "request": event.request_url(),
        "remote_addr": event.remote_addr,
        "remote_user": event.remote_user,
        "status": event.status.as_u16(),
        "content_length": event.content_length,
        "elapsed_ms": event.elapsed_time_millis(),
        "thread": event.thread_name,
    })
}

/// Drains whatever the `recent` queue holds.
async fn recent_handler(State(queues): State<NamedEventQueues>) -> impl IntoResponse {
    let queue = queues.queue(RECENT_QUEUE);
    let mut events = Vec::new();
    while let Some(event) = queue.try_pop() {
        events.push(summarize(&event));
    }
    Json(json!({ "count": events.len(), "events": events }))
}

/// Stand-in for an authentication layer: trusts `X-Demo-User` as the authenticated principal.
async fn demo_auth(mut request: Request, next: Next) -> Response {
    let user = request
        .headers()
        .get("x-demo-user")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    if let Some(user) = user {
        request.extensions_mut().insert(RemoteUser(user));
    }
    next.run(request).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,access_event=debug")),
        )
        .init();

    info!("Starting access log demo server");

    let queues = NamedEventQueues::new();
    let settings = AccessLogSettings::from_env()?;
    let access_log = auto_configure(&settings, &env::current_dir()?, &queues)?;
    info!(
        capture_request_body = access_log.config().capture_request_body,
        capture_response_body = access_log.config().capture_response_body,
        "Access log configured"
    );

    let app = Router::new()
        .route("/hello", get(hello_handler))
        .route("/echo", post(echo_handler))
        .route("/streaming", get(streaming_handler))
        .route("/recent", get(recent_handler))
        .with_state(queues)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(demo_auth))
                .layer(access_log)
                .into_inner(),
        );

    info!("Demo server endpoints:");
    info!("  GET  /hello      - Simple greeting");
    info!("  POST /echo       - Echo request body");
    info!("  GET  /streaming  - Streaming response");
    info!("  GET  /recent     - Drain events from the `recent` queue appender");
    info!("Try these commands:");
    info!("  curl http://localhost:3000/hello?name=demo");
    info!("  curl -H 'X-Demo-User: alice' -X POST -d 'Hello from client' http://localhost:3000/echo");
    info!("  curl http://localhost:3000/streaming");
    info!("  curl http://localhost:3000/recent");

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!("Demo server listening on http://localhost:3000");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

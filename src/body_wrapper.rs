//! Body observation utilities.
//!
//! This module wraps HTTP request and response bodies so the middleware can learn how many bytes
//! were written, optionally keep a copy of them, and find out when the body finished, without
//! delaying or altering the stream seen by the client.

use axum::body::{Body, Bytes, HttpBody};
use bytes::BytesMut;
use http_body::{Frame, SizeHint};
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Instant,
};
use tokio::sync::oneshot;
use tracing::error;

/// How an observed body ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyOutcome {
    /// Every frame was produced.
    Complete,
    /// The inner body yielded an error.
    Failed(String),
    /// The body was dropped before reaching its end, e.g. the client went away.
    Aborted,
}

/// What the observer learned about a body once it finished.
#[derive(Debug, Clone)]
pub struct BodySummary {
    /// Data bytes that passed through
    pub bytes_written: u64,
    /// Copy of those bytes, if capture was requested
    pub content: Option<Bytes>,
    /// When the body finished
    pub finished: Instant,
    /// Thread that observed the end of the body
    pub thread_name: String,
    pub outcome: BodyOutcome,
}

impl BodySummary {
    /// Summary for a response that never produced a body, e.g. because the inner service failed.
    pub fn unsent() -> Self {
        Self {
            bytes_written: 0,
            content: None,
            finished: Instant::now(),
            thread_name: current_thread_name(),
            outcome: BodyOutcome::Aborted,
        }
    }
}

/// Name of the running thread, falling back to its id for unnamed threads.
pub(crate) fn current_thread_name() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_owned(),
        None => format!("{:?}", thread.id()),
    }
}

/// A body that passes every frame through while counting (and optionally capturing) data.
///
/// Exactly one [`BodySummary`] is sent on the paired receiver: when the inner body reports its
/// end, when it errors, or when the wrapper is dropped, whichever happens first. Size hints and
/// end-of-stream state are forwarded so the server still frames the response the same way.
///
/// # Examples
///
/// ```rust
/// use access_event::body_wrapper::{BodyOutcome, ObservedBody};
/// use axum::body::Body;
/// use http_body_util::BodyExt;
///
/// # #[tokio::main]
/// # async fn main() {
/// let (body, completion) = ObservedBody::new(Body::from("Hello, World!"), true);
///
/// let bytes = Body::new(body).collect().await.unwrap().to_bytes();
/// let summary = completion.await.unwrap();
///
/// assert_eq!(bytes, "Hello, World!");
/// assert_eq!(summary.bytes_written, 13);
/// assert_eq!(summary.outcome, BodyOutcome::Complete);
/// # }
/// ```
pub struct ObservedBody {
    inner: Body,
    bytes_written: u64,
    captured: Option<BytesMut>,
    completion: Option<oneshot::Sender<BodySummary>>,
}

impl ObservedBody {
    /// Wraps `inner`, returning the wrapper and the receiver for its completion summary.
    pub fn new(inner: Body, capture: bool) -> (Self, oneshot::Receiver<BodySummary>) {
        let (tx, rx) = oneshot::channel();
        let body = Self {
            inner,
            bytes_written: 0,
            captured: capture.then(BytesMut::new),
            completion: Some(tx),
        };
        (body, rx)
    }

    fn finish(&mut self, outcome: BodyOutcome) {
        if let Some(tx) = self.completion.take() {
            let summary = BodySummary {
                bytes_written: self.bytes_written,
                content: self.captured.take().map(BytesMut::freeze),
                finished: Instant::now(),
                thread_name: current_thread_name(),
                outcome,
            };
            // The receiver is gone only if the dispatch task was cancelled.
            let _ = tx.send(summary);
        }
    }
}

impl HttpBody for ObservedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.bytes_written += data.len() as u64;
                    if let Some(buf) = this.captured.as_mut() {
                        buf.extend_from_slice(data);
                    }
                }
                // Servers stop polling once the body says it is done.
                if this.inner.is_end_stream() {
                    this.finish(BodyOutcome::Complete);
                }
            }
            Poll::Ready(Some(Err(e))) => {
                error!(error = %e, "Stream error while observing body");
                this.finish(BodyOutcome::Failed(e.to_string()));
            }
            Poll::Ready(None) => this.finish(BodyOutcome::Complete),
            Poll::Pending => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for ObservedBody {
    fn drop(&mut self) {
        let outcome = if self.inner.is_end_stream() {
            BodyOutcome::Complete
        } else {
            BodyOutcome::Aborted
        };
        self.finish(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_body_passes_through_and_is_counted() {
        let (body, completion) = ObservedBody::new(Body::from("Hello, World!"), false);

        let collected = Body::new(body).collect().await.unwrap().to_bytes();
        let summary = completion.await.unwrap();

        assert_eq!(collected, "Hello, World!");
        assert_eq!(summary.bytes_written, 13);
        assert!(summary.content.is_none());
        assert_eq!(summary.outcome, BodyOutcome::Complete);
        assert!(!summary.thread_name.is_empty());
    }

    #[tokio::test]
    async fn test_streaming_body_capture() {
        let chunks = stream::iter(vec![
            Ok::<_, std::convert::Infallible>(Bytes::from("chunk1")),
            Ok(Bytes::from("chunk2")),
            Ok(Bytes::from("chunk3")),
        ]);
        let (body, completion) = ObservedBody::new(Body::from_stream(chunks), true);

        let collect_task =
            tokio::spawn(async move { Body::new(body).collect().await.unwrap().to_bytes() });
        let capture_task = tokio::spawn(async move { completion.await.unwrap() });

        let (body_content, summary) = tokio::join!(collect_task, capture_task);
        let body_content = body_content.unwrap();
        let summary = summary.unwrap();

        assert_eq!(body_content, "chunk1chunk2chunk3");
        assert_eq!(summary.bytes_written, 18);
        assert_eq!(summary.content.unwrap(), "chunk1chunk2chunk3");
    }

    #[tokio::test]
    async fn test_size_hint_is_preserved() {
        let (body, _completion) = ObservedBody::new(Body::from("text"), false);
        assert_eq!(body.size_hint().exact(), Some(4));
    }

    #[tokio::test]
    async fn test_empty_body_completes_on_drop() {
        let (body, completion) = ObservedBody::new(Body::empty(), true);
        assert!(body.is_end_stream());
        drop(body);

        let summary = completion.await.unwrap();
        assert_eq!(summary.bytes_written, 0);
        assert_eq!(summary.outcome, BodyOutcome::Complete);
        assert_eq!(summary.content.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_dropped_stream_is_aborted() {
        let chunks = stream::iter(vec![
            Ok::<_, std::convert::Infallible>(Bytes::from("first")),
            Ok(Bytes::from("second")),
        ]);
        let (body, completion) = ObservedBody::new(Body::from_stream(chunks), false);
        let mut body = Body::new(body);

        let first = body.frame().await.unwrap().unwrap();
        assert_eq!(first.into_data().unwrap(), "first");
        drop(body);

        let summary = completion.await.unwrap();
        assert_eq!(summary.bytes_written, 5);
        assert_eq!(summary.outcome, BodyOutcome::Aborted);
    }
}

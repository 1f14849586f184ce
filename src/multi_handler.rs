//! Composite handler for delivering each event to several sinks.
//!
//! This module provides [`MultiHandler`], which composes an arbitrary number of
//! [`AccessEventHandler`] implementations. Every handler receives the same `Arc<AccessEvent>`
//! and they run concurrently.
//!
//! # Example
//!
//! ```rust
//! use access_event::{queue::EventQueue, LoggingHandler, MultiHandler};
//!
//! let queue = EventQueue::new();
//! let handler = MultiHandler::new()
//!     .with(LoggingHandler::default())
//!     .with(queue.clone());
//!
//! assert_eq!(handler.len(), 2);
//! ```

use crate::{types::AccessEvent, AccessEventHandler};
use futures::future::join_all;
use std::{future::Future, pin::Pin, sync::Arc};

type EventFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Object-safe form of [`AccessEventHandler`], whose `impl Future` return cannot be boxed as `dyn`.
trait ErasedHandler: Send + Sync + 'static {
    fn dispatch(&self, event: Arc<AccessEvent>) -> EventFuture<'_>;
}

struct Erased<H>(H);

impl<H: AccessEventHandler> ErasedHandler for Erased<H> {
    fn dispatch(&self, event: Arc<AccessEvent>) -> EventFuture<'_> {
        Box::pin(self.0.handle_event(event))
    }
}

/// Delivers every event to each registered sink.
///
/// An empty `MultiHandler` drops every event, which is how a configuration with no appenders
/// behaves.
#[derive(Clone, Default)]
pub struct MultiHandler {
    sinks: Vec<Arc<dyn ErasedHandler>>,
}

impl MultiHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers another sink.
    pub fn with<H: AccessEventHandler>(mut self, sink: H) -> Self {
        self.sinks.push(Arc::new(Erased(sink)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Number of registered sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }
}

impl std::fmt::Debug for MultiHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiHandler")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl AccessEventHandler for MultiHandler {
    async fn handle_event(&self, event: Arc<AccessEvent>) {
        join_all(self.sinks.iter().map(|sink| sink.dispatch(Arc::clone(&event)))).await;
    }
}

//! In-memory event sinks.
//!
//! [`EventQueue`] is a FIFO of finished events that test code (or any other consumer) can drain.
//! [`NamedEventQueues`] keeps several independent queues keyed by name. Both are plain values
//! owned by whoever constructs them; cloning a handle shares the underlying queue.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::{error::AccessLogError, types::AccessEvent, AccessEventHandler};

/// What [`EventQueue::pop`] does when the queue is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Fail straight away with [`AccessLogError::QueueEmpty`].
    Immediate,
    /// Wait up to the given duration for an event, then fail with
    /// [`AccessLogError::QueueTimeout`].
    Bounded(Duration),
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::Bounded(Duration::from_secs(5))
    }
}

struct QueueState {
    events: Mutex<VecDeque<Arc<AccessEvent>>>,
    available: Notify,
}

/// A thread-safe FIFO of access events.
///
/// Any number of request tasks may push concurrently. Popping with a bounded [`WaitPolicy`]
/// lets a consumer observe events whose responses complete asynchronously.
///
/// # Examples
///
/// ```rust
/// use access_event::{queue::EventQueue, types::AccessEvent};
/// use axum::http::{Method, StatusCode};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() {
/// let queue = EventQueue::new();
/// let event = Arc::new(AccessEvent::new(Method::GET, "/text", StatusCode::OK));
///
/// queue.push(event.clone());
/// let popped = queue.pop().await.unwrap();
///
/// assert!(Arc::ptr_eq(&event, &popped));
/// assert!(queue.is_empty());
/// # }
/// ```
#[derive(Clone)]
pub struct EventQueue {
    state: Arc<QueueState>,
    wait_policy: WaitPolicy,
}

impl EventQueue {
    /// Creates an empty queue with the default bounded wait.
    pub fn new() -> Self {
        Self::with_wait_policy(WaitPolicy::default())
    }

    pub fn with_wait_policy(wait_policy: WaitPolicy) -> Self {
        Self {
            state: Arc::new(QueueState {
                events: Mutex::new(VecDeque::new()),
                available: Notify::new(),
            }),
            wait_policy,
        }
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        self.wait_policy
    }

    fn events(&self) -> MutexGuard<'_, VecDeque<Arc<AccessEvent>>> {
        // A panicking consumer must not wedge every later request.
        self.state
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, event: Arc<AccessEvent>) {
        self.events().push_back(event);
        self.state.available.notify_one();
    }

    /// Removes the oldest event without waiting.
    pub fn try_pop(&self) -> Option<Arc<AccessEvent>> {
        self.events().pop_front()
    }

    /// Removes the oldest event, waiting according to the queue's [`WaitPolicy`].
    pub async fn pop(&self) -> Result<Arc<AccessEvent>, AccessLogError> {
        let timeout = match self.wait_policy {
            WaitPolicy::Immediate => return self.try_pop().ok_or(AccessLogError::QueueEmpty),
            WaitPolicy::Bounded(timeout) => timeout,
        };

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.try_pop() {
                return Ok(event);
            }
            // notify_one stores a permit when nobody is waiting, so a push between the
            // check above and this await is not lost.
            if tokio::time::timeout_at(deadline, self.state.available.notified())
                .await
                .is_err()
            {
                debug!(?timeout, "Timed out waiting for access event");
                return self
                    .try_pop()
                    .ok_or(AccessLogError::QueueTimeout(timeout));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events().is_empty()
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    /// Drops every queued event.
    pub fn clear(&self) {
        self.events().clear();
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("len", &self.len())
            .field("wait_policy", &self.wait_policy)
            .finish()
    }
}

impl AccessEventHandler for EventQueue {
    async fn handle_event(&self, event: Arc<AccessEvent>) {
        self.push(event);
    }
}

/// Independent event queues keyed by name.
///
/// Each queue is created on first use. Call [`NamedEventQueues::clear`] before every test case
/// so events from one case never leak into the next.
#[derive(Clone, Default)]
pub struct NamedEventQueues {
    queues: Arc<Mutex<HashMap<String, EventQueue>>>,
    wait_policy: WaitPolicy,
}

impl NamedEventQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose queues all use `wait_policy`.
    pub fn with_wait_policy(wait_policy: WaitPolicy) -> Self {
        Self {
            queues: Arc::default(),
            wait_policy,
        }
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<String, EventQueue>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the queue registered under `name`, creating it if needed.
    pub fn queue(&self, name: &str) -> EventQueue {
        self.queues()
            .entry(name.to_owned())
            .or_insert_with(|| EventQueue::with_wait_policy(self.wait_policy))
            .clone()
    }

    pub async fn pop(&self, name: &str) -> Result<Arc<AccessEvent>, AccessLogError> {
        self.queue(name).pop().await
    }

    pub fn is_empty(&self, name: &str) -> bool {
        self.queues()
            .get(name)
            .map_or(true, EventQueue::is_empty)
    }

    /// Names of every queue created so far, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues().keys().cloned().collect();
        names.sort();
        names
    }

    /// Empties every queue. Handles obtained earlier stay valid.
    pub fn clear(&self) {
        for queue in self.queues().values() {
            queue.clear();
        }
    }
}

impl std::fmt::Debug for NamedEventQueues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedEventQueues")
            .field("names", &self.names())
            .field("wait_policy", &self.wait_policy)
            .finish()
    }
}

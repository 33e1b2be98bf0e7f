//! Thread-safe FIFO of decoded events shared by the reader and the caller.
//!
//! The queue is unbounded by default. Under a slow consumer an unbounded
//! queue grows without limit, so integrators that cannot guarantee draining
//! should configure a capacity and an [`OverflowPolicy`].

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::events::Event;

/// Default time a blocking push waits for room.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// What a push does when the queue is at capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait up to the push timeout for the consumer to make room.
    #[default]
    Block,
    /// Evict the oldest queued event to make room.
    DropOldest,
    /// Refuse the new event immediately.
    Reject,
}

/// Capacity settings for an [`EventQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum queued events; `None` is unbounded.
    pub capacity: Option<usize>,
    pub overflow: OverflowPolicy,
    /// Upper bound on a blocking push.
    pub push_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            overflow: OverflowPolicy::Block,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
        }
    }
}

impl QueueConfig {
    /// A bounded queue with the given overflow policy.
    #[must_use]
    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            overflow,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }
}

/// Error type for queue pushes.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Unable to add event: queue is full")]
    Full,
    #[error("Unable to add event: queue is closed")]
    Closed,
}

/// Result of a successful push.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PushOutcome {
    Queued,
    /// The event was queued after evicting the oldest one.
    EvictedOldest,
}

#[derive(Debug, Default)]
struct Inner {
    items: VecDeque<Event>,
    closed: bool,
}

/// Bounded-or-unbounded FIFO with async blocking pop.
///
/// Once closed, pushes fail and pops drain what is left before returning
/// `None` without waiting.
#[derive(Debug)]
pub struct EventQueue {
    inner: Mutex<Inner>,
    readable: Notify,
    writable: Notify,
    config: QueueConfig,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl EventQueue {
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            readable: Notify::new(),
            writable: Notify::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> QueueConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_full(&self, inner: &Inner) -> bool {
        self.config
            .capacity
            .is_some_and(|capacity| inner.items.len() >= capacity)
    }

    /// Append an event, applying the overflow policy when full.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Closed` if the queue is closed, or
    /// `QueueError::Full` if it stayed full (`Block`) or was full (`Reject`).
    pub async fn push(&self, event: Event) -> Result<PushOutcome, QueueError> {
        let deadline = Instant::now() + self.config.push_timeout;
        let mut event = Some(event);

        loop {
            let mut notified = pin!(self.writable.notified());
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed {
                    return Err(QueueError::Closed);
                }

                let mut outcome = PushOutcome::Queued;
                if self.is_full(&inner) {
                    match self.config.overflow {
                        OverflowPolicy::Reject => return Err(QueueError::Full),
                        OverflowPolicy::DropOldest => {
                            inner.items.pop_front();
                            outcome = PushOutcome::EvictedOldest;
                        }
                        OverflowPolicy::Block => {}
                    }
                }

                if !self.is_full(&inner) {
                    if let Some(event) = event.take() {
                        inner.items.push_back(event);
                    }
                    drop(inner);
                    self.readable.notify_one();
                    return Ok(outcome);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(QueueError::Full);
            }
        }
    }

    /// Remove the oldest event without waiting.
    pub fn try_pop(&self) -> Option<Event> {
        let event = self.lock().items.pop_front();
        if event.is_some() {
            self.writable.notify_one();
        }
        event
    }

    /// Remove the oldest event, waiting for one to arrive.
    ///
    /// Returns immediately if an event is queued. Otherwise waits up to
    /// `timeout`, or indefinitely when `timeout` is `None`, until an event
    /// arrives or the queue is closed.
    pub async fn pop(&self, timeout: Option<Duration>) -> Option<Event> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let mut notified = pin!(self.readable.notified());
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(event) = inner.items.pop_front() {
                    drop(inner);
                    self.writable.notify_one();
                    return Some(event);
                }
                if inner.closed {
                    return None;
                }
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.try_pop();
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Refuse further pushes and wake every waiter.
    pub fn close(&self) {
        self.lock().closed = true;
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    /// Queue a final event without waiting, then close.
    ///
    /// A full queue gives up its oldest event to make room, whatever the
    /// overflow policy.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Closed` if the queue was already closed.
    pub fn close_with(&self, event: Event) -> Result<PushOutcome, QueueError> {
        let outcome = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(QueueError::Closed);
            }
            let mut outcome = PushOutcome::Queued;
            if self.is_full(&inner) {
                inner.items.pop_front();
                outcome = PushOutcome::EvictedOldest;
            }
            inner.items.push_back(event);
            inner.closed = true;
            outcome
        };
        self.readable.notify_waiters();
        self.writable.notify_waiters();
        Ok(outcome)
    }

    /// Discard all queued events, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut inner = self.lock();
            let dropped = inner.items.len();
            inner.items.clear();
            dropped
        };
        self.writable.notify_waiters();
        dropped
    }

    /// Empty the queue and accept pushes again.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.items.clear();
        inner.closed = false;
    }
}

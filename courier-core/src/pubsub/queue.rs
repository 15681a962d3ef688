//! Bounded inbound queue
//!
//! Decouples ingestion (transport receive path, local loopback) from
//! callback execution. Many producers, one consumer: the dispatch loop.
//!
//! When full, the configured [`BackpressurePolicy`] applies:
//!
//! - **`DropNewest`**: the incoming message is rejected
//! - **`DropOldest`**: the head of the queue is evicted to make room
//! - **`Block`**: [`push`](InboundQueue::push) waits for room;
//!   [`try_push`](InboundQueue::try_push) still rejects
//!
//! Every rejected or evicted message increments the drop counter by one.

use super::message::InboundMessage;
use crate::config::BackpressurePolicy;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Notify;

/// Why a message was not enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PushError {
    /// Queue full; message dropped under the backpressure policy
    #[error("inbound queue full, message dropped")]
    Dropped,

    /// Channel name or payload exceeds configured limits
    #[error("message exceeds configured limits")]
    Oversized,

    /// Queue closed by shutdown
    #[error("inbound queue closed")]
    Closed,
}

struct QueueState {
    items: VecDeque<InboundMessage>,
    closed: bool,
    last_seq: u64,
}

/// Bounded FIFO of inbound messages
pub struct InboundQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    policy: BackpressurePolicy,
    dropped: AtomicU64,
    not_empty: Notify,
    not_full: Notify,
}

impl InboundQueue {
    /// Create a queue holding at most `capacity` messages (minimum 1)
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(4096)),
                closed: false,
                last_seq: 0,
            }),
            capacity,
            policy,
            dropped: AtomicU64::new(0),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn accept(&self, state: &mut QueueState, mut message: InboundMessage) {
        state.last_seq += 1;
        message.seq = state.last_seq;
        state.items.push_back(message);
    }

    /// Enqueue without waiting.
    ///
    /// Returns the evicted message when `DropOldest` had to make room.
    ///
    /// # Errors
    ///
    /// `Dropped` when full under `DropNewest` or `Block`, `Closed` after
    /// [`close`](Self::close).
    pub fn try_push(&self, message: InboundMessage) -> Result<Option<InboundMessage>, PushError> {
        let mut state = self.lock();
        if state.closed {
            return Err(PushError::Closed);
        }

        if state.items.len() < self.capacity {
            self.accept(&mut state, message);
            drop(state);
            self.not_empty.notify_one();
            return Ok(None);
        }

        match self.policy {
            BackpressurePolicy::DropOldest => {
                let evicted = state.items.pop_front();
                self.accept(&mut state, message);
                drop(state);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.not_empty.notify_one();
                Ok(evicted)
            }
            BackpressurePolicy::DropNewest | BackpressurePolicy::Block => {
                drop(state);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(PushError::Dropped)
            }
        }
    }

    /// Enqueue, waiting for room under the `Block` policy.
    ///
    /// Other policies behave exactly like [`try_push`](Self::try_push).
    ///
    /// # Errors
    ///
    /// `Dropped` under the dropping policies, `Closed` if the queue is (or
    /// becomes) closed while waiting.
    pub async fn push(&self, message: InboundMessage) -> Result<Option<InboundMessage>, PushError> {
        if self.policy != BackpressurePolicy::Block {
            return self.try_push(message);
        }

        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return Err(PushError::Closed);
                }
                if state.items.len() < self.capacity {
                    self.accept(&mut state, message);
                    drop(state);
                    self.not_empty.notify_one();
                    return Ok(None);
                }
            }

            notified.await;
        }
    }

    /// Dequeue the next message, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed; messages still queued at
    /// that point are not handed out.
    pub async fn pop(&self) -> Option<InboundMessage> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(message) = state.items.pop_front() {
                    drop(state);
                    self.not_full.notify_one();
                    return Some(message);
                }
            }

            notified.await;
        }
    }

    /// Dequeue without waiting
    pub fn try_pop(&self) -> Option<InboundMessage> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        let message = state.items.pop_front();
        drop(state);
        if message.is_some() {
            self.not_full.notify_one();
        }
        message
    }

    /// Close the queue, waking the consumer and any blocked producers.
    ///
    /// Returns the number of messages discarded.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut state = self.lock();
            state.closed = true;
            let n = state.items.len();
            state.items.clear();
            n
        };
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
        discarded
    }

    /// Whether the queue has been closed
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Messages dropped under backpressure so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Sequence number of the most recently accepted message (0 if none)
    pub fn last_seq(&self) -> u64 {
        self.lock().last_seq
    }

    /// Messages currently queued
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether no messages are queued
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Maximum number of queued messages
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Backpressure policy
    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }
}

impl std::fmt::Debug for InboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("dropped", &self.dropped())
            .finish()
    }
}

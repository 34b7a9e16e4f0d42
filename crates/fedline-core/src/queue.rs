//! Dual-queue message store for one joined federate.
//!
//! Incoming messages land in one of two queues:
//!
//! - **RO** (receive order): FIFO, released in arrival order.
//! - **TSO** (timestamp order): min-heap on logical time, released only once
//!   the federation can no longer send anything earlier.
//!
//! What may be released depends on the federate's time status, read through a
//! [`TimeSource`] at every poll:
//!
//! ```text
//! poll()
//!   RO non-empty?
//!     constrained && !asynchronous && no advance outstanding
//!       -> first non-spec message in RO (or nothing)
//!     otherwise
//!       -> RO head
//!   TSO head is a time-advance grant            -> TSO head
//!   TSO head time <= LBTS && <= requested time  -> TSO head
//!   otherwise                                   -> nothing
//! ```
//!
//! A message sits in exactly one queue until it is released; nothing is
//! duplicated. All state lives behind one mutex; async waiters park on a
//! [`Notify`] and re-run `poll()` when woken.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    fmt,
    sync::Arc,
    time::Duration,
};

use fedline_proto::Message;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{sync::Notify, time::Instant};

use crate::{error::HandlerError, time::TimeSource};

/// Consumer of released messages.
///
/// Called by the scheduler for queued messages and directly by
/// [`MessageQueue::offer`] for immediate ones. Must not block.
pub trait IncomingHandler: Send + Sync {
    /// Process one message.
    fn process(&self, message: Message) -> Result<(), HandlerError>;
}

/// Queue contents in a persistable form.
///
/// Save bookkeeping is filtered out of `receive_order`; `timestamp_order` is
/// in release order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// RO contents, head first.
    pub receive_order: Vec<Message>,
    /// TSO contents, next release first.
    pub timestamp_order: Vec<Message>,
}

/// TSO heap entry.
///
/// Ordered so the max-heap pops the lowest timestamp first; at equal
/// timestamps ordinary messages beat the time-advance grant, and ties fall back
/// to insertion order.
#[derive(Debug)]
struct TsoEntry {
    timestamp: f64,
    is_grant: bool,
    seq: u64,
    message: Message,
}

impl Ord for TsoEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .timestamp
            .total_cmp(&self.timestamp)
            .then_with(|| other.is_grant.cmp(&self.is_grant))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TsoEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TsoEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TsoEntry {}

#[derive(Debug, Default)]
struct QueueState {
    receive_order: VecDeque<Message>,
    timestamp_order: BinaryHeap<TsoEntry>,
    next_seq: u64,
}

impl QueueState {
    fn push_tso(&mut self, timestamp: f64, message: Message) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timestamp_order.push(TsoEntry {
            timestamp,
            is_grant: message.is_time_advance_grant(),
            seq,
            message,
        });
    }

    /// TSO contents in release order, left in place.
    fn tso_in_order(&self) -> Vec<&TsoEntry> {
        let mut entries: Vec<&TsoEntry> = self.timestamp_order.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries
    }

    fn first_non_spec(&mut self) -> Option<Message> {
        let index = self.receive_order.iter().position(|message| !message.is_spec_message())?;
        self.receive_order.remove(index)
    }
}

/// Message queue of one joined federate.
pub struct MessageQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    time: Arc<dyn TimeSource>,
    handler: Arc<dyn IncomingHandler>,
}

impl MessageQueue {
    /// Empty queue gated by `time`, delivering immediates to `handler`.
    pub fn new(time: Arc<dyn TimeSource>, handler: Arc<dyn IncomingHandler>) -> Self {
        Self { state: Mutex::new(QueueState::default()), notify: Notify::new(), time, handler }
    }

    /// Handler released messages are delivered to.
    pub fn handler(&self) -> &Arc<dyn IncomingHandler> {
        &self.handler
    }

    /// Time source consulted by [`Self::poll`].
    pub fn time_source(&self) -> &Arc<dyn TimeSource> {
        &self.time
    }

    /// Accept a message.
    ///
    /// Immediate messages go straight to the handler and are never queued;
    /// the result is false if the handler rejected it. Everything else is
    /// queued and the result is true.
    pub fn offer(&self, message: Message) -> bool {
        if message.immediate {
            return match self.handler.process(message) {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(error = %e, "immediate message rejected by handler");
                    false
                },
            };
        }

        {
            let mut state = self.state.lock();
            if !self.time.is_constrained() {
                let mut message = message;
                message.timestamp = None;
                state.receive_order.push_back(message);
            } else if let Some(timestamp) = message.timestamp {
                state.push_tso(timestamp, message);
            } else {
                state.receive_order.push_back(message);
            }
        }

        self.notify.notify_waiters();
        true
    }

    /// Release the next eligible message, if any. Never waits.
    pub fn poll(&self) -> Option<Message> {
        let mut state = self.state.lock();

        let gate = self.time.release_gate();
        if !state.receive_order.is_empty() {
            let holding_spec = gate.constrained && !gate.asynchronous && !gate.advancing;

            return if holding_spec {
                state.first_non_spec()
            } else {
                state.receive_order.pop_front()
            };
        }

        let head = state.timestamp_order.peek()?;
        let releasable = head.is_grant
            || (head.timestamp <= gate.federation_lbts && head.timestamp <= gate.requested_time);

        if releasable { state.timestamp_order.pop().map(|entry| entry.message) } else { None }
    }

    /// Wait up to `timeout` for a releasable message.
    pub async fn poll_timeout(&self, timeout: Duration) -> Option<Message> {
        self.poll_until(Instant::now() + timeout).await
    }

    /// Wait until `deadline` for a releasable message.
    ///
    /// Cancel-safe: a message is only dequeued by the `poll()` that returns it.
    pub async fn poll_until(&self, deadline: Instant) -> Option<Message> {
        loop {
            let notified = self.notify.notified();
            if let Some(message) = self.poll() {
                return Some(message);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.poll();
            }
        }
    }

    /// Wait as long as it takes for a releasable message. Cancel-safe.
    pub async fn poll_next(&self) -> Message {
        loop {
            let notified = self.notify.notified();
            if let Some(message) = self.poll() {
                return message;
            }
            notified.await;
        }
    }

    /// Wake every waiter so it re-evaluates release eligibility.
    ///
    /// Time management calls this after changing the status the queue reads.
    pub fn wake(&self) {
        self.notify.notify_waiters();
    }

    /// Drain all of RO plus every TSO entry at or before `max_time`, ignoring
    /// time status.
    pub fn flush(&self, max_time: f64) -> Vec<Message> {
        let mut state = self.state.lock();
        let mut flushed: Vec<Message> = state.receive_order.drain(..).collect();

        while state.timestamp_order.peek().is_some_and(|entry| entry.timestamp <= max_time) {
            if let Some(entry) = state.timestamp_order.pop() {
                flushed.push(entry.message);
            }
        }

        flushed
    }

    /// Move every TSO entry to the back of RO, in release order, with its
    /// timestamp cleared.
    pub fn became_unconstrained(&self) {
        {
            let mut state = self.state.lock();
            while let Some(entry) = state.timestamp_order.pop() {
                let mut message = entry.message;
                message.timestamp = None;
                state.receive_order.push_back(message);
            }
        }
        self.notify.notify_waiters();
    }

    /// Timestamp of the next TSO entry.
    pub fn peek_tso_time(&self) -> Option<f64> {
        self.state.lock().timestamp_order.peek().map(|entry| entry.timestamp)
    }

    /// Whether both queues are empty.
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.receive_order.is_empty() && state.timestamp_order.is_empty()
    }

    /// Messages held across both queues.
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.receive_order.len() + state.timestamp_order.len()
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.receive_order.clear();
        state.timestamp_order.clear();
    }

    /// Copy the contents for persistence. The queue is left untouched.
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock();
        QueueSnapshot {
            receive_order: state
                .receive_order
                .iter()
                .filter(|message| !message.is_save_bookkeeping())
                .cloned()
                .collect(),
            timestamp_order: state
                .tso_in_order()
                .into_iter()
                .map(|entry| entry.message.clone())
                .collect(),
        }
    }

    /// Load a snapshot: RO is replaced, TSO entries are added to what is
    /// already queued. TSO entries without a timestamp are appended to RO.
    pub fn restore(&self, snapshot: QueueSnapshot) {
        {
            let mut state = self.state.lock();
            state.receive_order = snapshot.receive_order.into();

            for message in snapshot.timestamp_order {
                match message.timestamp {
                    Some(timestamp) => state.push_tso(timestamp, message),
                    None => state.receive_order.push_back(message),
                }
            }
        }
        self.notify.notify_waiters();
    }
}

impl fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MessageQueue")
            .field("receive_order", &state.receive_order.len())
            .field("timestamp_order", &state.timestamp_order.len())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();

        writeln!(f, "[RO queue]")?;
        if state.receive_order.is_empty() {
            writeln!(f, "  (empty)")?;
        }
        for (i, message) in state.receive_order.iter().enumerate() {
            writeln!(f, "  [{}] {:?} src={}", i + 1, message.category, message.source)?;
        }

        writeln!(f, "[TSO queue]")?;
        let entries = state.tso_in_order();
        if entries.is_empty() {
            writeln!(f, "  (empty)")?;
        }
        for (i, entry) in entries.iter().enumerate() {
            writeln!(
                f,
                "  [{}] {:?} @{} src={}",
                i + 1,
                entry.message.category,
                entry.timestamp,
                entry.message.source
            )?;
        }

        Ok(())
    }
}

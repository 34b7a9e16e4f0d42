//! Incoming handler that remembers what it was given.

use fedline_core::{HandlerError, IncomingHandler};
use fedline_proto::{Body, Message, ResignNotice};
use parking_lot::Mutex;

/// Records every delivered message, in delivery order.
///
/// A rejecting recorder still records, then reports failure, which lets tests
/// check that handler errors never stall delivery.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    delivered: Mutex<Vec<Message>>,
    reject: bool,
}

impl RecordingHandler {
    /// Recorder that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorder that fails every message after recording it.
    pub fn rejecting() -> Self {
        Self { delivered: Mutex::new(Vec::new()), reject: true }
    }

    /// Everything delivered so far.
    pub fn messages(&self) -> Vec<Message> {
        self.delivered.lock().clone()
    }

    /// Timestamps of delivered messages, `None` for receive-order ones.
    pub fn timestamps(&self) -> Vec<Option<f64>> {
        self.delivered.lock().iter().map(|message| message.timestamp).collect()
    }

    /// Resignation notices delivered so far.
    pub fn resignations(&self) -> Vec<ResignNotice> {
        self.delivered
            .lock()
            .iter()
            .filter_map(|message| match &message.body {
                Body::Resign(notice) => Some(notice.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of delivered messages.
    pub fn len(&self) -> usize {
        self.delivered.lock().len()
    }

    /// Whether nothing has been delivered.
    pub fn is_empty(&self) -> bool {
        self.delivered.lock().is_empty()
    }

    /// Forget everything delivered so far.
    pub fn clear(&self) {
        self.delivered.lock().clear();
    }
}

impl IncomingHandler for RecordingHandler {
    fn process(&self, message: Message) -> Result<(), HandlerError> {
        self.delivered.lock().push(message);
        if self.reject { Err(HandlerError::new("rejected by recorder")) } else { Ok(()) }
    }
}

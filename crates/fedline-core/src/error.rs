//! Error types for the fedline core.
//!
//! Strongly-typed errors for each layer: lifecycle errors surfaced to callers
//! of the coordination protocol, transport errors from the group channel,
//! delivery errors from the scheduler, and failures raised by incoming
//! handlers.

use std::time::Duration;

use fedline_proto::{Handle, ProtocolError};
use thiserror::Error;

/// Errors from federation lifecycle operations.
///
/// Precondition violations are returned synchronously and never retried.
/// [`FederationError::Communication`] means the outcome is unknown: re-read
/// the manifest before trying again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FederationError {
    /// A federation already exists on this channel
    #[error("federation already exists: {0}")]
    FederationAlreadyExists(String),

    /// No federation exists on this channel
    #[error("federation does not exist: {0}")]
    FederationDoesNotExist(String),

    /// Another federate already joined with this name
    #[error("federate name in use: {0}")]
    FederateNameInUse(String),

    /// Destroy attempted while federates remain joined
    #[error("federates still joined to {federation}: {handles:?}")]
    FederatesCurrentlyJoined {
        /// Federation name
        federation: String,
        /// Handles of the joined federates
        handles: Vec<Handle>,
    },

    /// The local process already has a joined federate
    #[error("already joined as {0}")]
    AlreadyJoined(String),

    /// Operation requires a connected channel
    #[error("not connected to channel")]
    NotConnected,

    /// Operation requires a joined federate
    #[error("no federate joined on this channel")]
    NotJoined,

    /// Configuration rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Broadcast or transport failure; outcome indeterminate
    #[error("communication failure: {0}")]
    Communication(#[from] TransportError),

    /// Frame could not be built or parsed
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Internal failure (e.g. a join the coordinator never acknowledged)
    #[error("internal error: {0}")]
    Internal(String),
}

impl FederationError {
    /// Returns true if the operation may succeed on retry.
    ///
    /// Only communication timeouts qualify, and even then the caller must
    /// re-query the manifest first: a timed-out broadcast may still have been
    /// applied by some members.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Communication(err) if err.is_transient())
    }

    /// Returns true for protocol precondition violations.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::FederationAlreadyExists(_)
                | Self::FederationDoesNotExist(_)
                | Self::FederateNameInUse(_)
                | Self::FederatesCurrentlyJoined { .. }
                | Self::AlreadyJoined(_)
                | Self::NotConnected
                | Self::NotJoined
        )
    }
}

/// Errors from the group communication transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Not connected to a channel
    #[error("transport not connected")]
    NotConnected,

    /// Already connected to a channel
    #[error("transport already connected to {0}")]
    AlreadyConnected(String),

    /// Reliable broadcast not acknowledged by every member in time
    #[error("broadcast not acknowledged after {elapsed:?} ({missing} members missing)")]
    Timeout {
        /// How long we waited
        elapsed: Duration,
        /// Members that never acknowledged
        missing: usize,
    },

    /// Channel closed underneath the operation
    #[error("channel closed")]
    Closed,

    /// Send failed for another reason
    #[error("send failed: {0}")]
    Send(String),
}

impl TransportError {
    /// Returns true if this error is transient and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Failure raised by an incoming handler while processing a message.
///
/// The scheduler logs and swallows these; they never stop delivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("handler failed: {reason}")]
pub struct HandlerError {
    /// Description from the handler
    pub reason: String,
}

impl HandlerError {
    /// Create a handler error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Errors from the delivery scheduler's tick family.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    /// A tick was entered while another tick is still running
    #[error("concurrent access: tick called while already ticking")]
    ConcurrentAccess,

    /// `tick_window` called with zero for both bounds
    #[error("invalid tick window: min={min:?} max={max:?}")]
    InvalidTickWindow {
        /// Requested minimum
        min: Duration,
        /// Requested maximum
        max: Duration,
    },
}

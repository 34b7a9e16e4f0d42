//! Federate time status.
//!
//! The message queue never owns time management; it reads the local
//! federate's status through [`TimeSource`] every time it decides whether a
//! message may be released. [`TimeStatus`] is the plain value a time manager
//! mutates, and [`SharedTimeStatus`] is the lock-guarded handle shared between
//! that manager and the queue.

use std::{fmt, sync::Arc};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Three-way switch for constrained/regulating modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriState {
    /// Enabled.
    On,
    /// Enable requested, waiting for the federation to confirm.
    Pending,
    /// Disabled.
    #[default]
    Off,
}

/// Progress of a time-advance request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdvanceState {
    /// No request outstanding.
    #[default]
    None,
    /// Advance requested, grant not yet issued.
    Requested,
    /// Grant issued, callback not yet processed.
    Provisional,
}

/// Time status of one federate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeStatus {
    /// Constrained mode.
    pub constrained: TriState,
    /// Regulating mode.
    pub regulating: TriState,
    /// Advance request progress.
    pub advancing: AdvanceState,
    /// Current logical time.
    pub current_time: f64,
    /// Time named in the last advance request.
    pub requested_time: f64,
    /// Lookahead promised while regulating.
    pub lookahead: f64,
    /// Federate LBTS (requested time plus lookahead).
    pub lbts: f64,
    /// Release receive-order spec messages without an outstanding advance.
    pub asynchronous: bool,
}

impl Default for TimeStatus {
    fn default() -> Self {
        Self {
            constrained: TriState::Off,
            regulating: TriState::Off,
            advancing: AdvanceState::None,
            current_time: 0.0,
            requested_time: 0.0,
            lookahead: 0.0,
            lbts: 0.0,
            asynchronous: false,
        }
    }
}

impl TimeStatus {
    /// Status of a federate that is constrained and nothing else.
    #[must_use]
    pub fn constrained() -> Self {
        Self { constrained: TriState::On, ..Self::default() }
    }

    /// Back to the freshly-joined state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Whether constrained mode is on.
    pub fn is_constrained(&self) -> bool {
        self.constrained == TriState::On
    }

    /// Whether constrained mode was requested but not yet confirmed.
    pub fn is_constrained_pending(&self) -> bool {
        self.constrained == TriState::Pending
    }

    /// Whether regulating mode is on.
    pub fn is_regulating(&self) -> bool {
        self.regulating == TriState::On
    }

    /// Whether regulating mode was requested but not yet confirmed.
    pub fn is_regulating_pending(&self) -> bool {
        self.regulating == TriState::Pending
    }

    /// Whether a request is waiting for its grant.
    pub fn is_in_advancing_state(&self) -> bool {
        self.advancing == AdvanceState::Requested
    }

    /// Whether any advance is outstanding, granted or not.
    pub fn is_advance_outstanding(&self) -> bool {
        self.advancing != AdvanceState::None
    }

    /// Record a time-advance request for `time`.
    pub fn advance_requested(&mut self, time: f64) {
        self.requested_time = time;
        self.lbts = time + self.lookahead;
        self.advancing = AdvanceState::Requested;
    }

    /// Move the federate to `time` and mark the advance provisional.
    pub fn advance_federate(&mut self, time: f64) {
        self.current_time = time;
        self.lbts = time + self.lookahead;
        self.advancing = AdvanceState::Provisional;
    }

    /// The grant for `time` has been delivered to the federate.
    pub fn advance_granted(&mut self, time: f64) {
        self.advancing = AdvanceState::None;
        self.current_time = time;
        self.requested_time = time;
    }

    /// Whether an outstanding request may be granted given `federation_lbts`.
    pub fn can_advance(&self, federation_lbts: f64) -> bool {
        if !self.is_in_advancing_state() {
            return false;
        }

        !self.is_constrained() || self.requested_time < federation_lbts
    }
}

impl fmt::Display for TimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "current={} requested={} lookahead={} lbts={} constrained={:?} regulating={:?} \
             advancing={:?}",
            self.current_time,
            self.requested_time,
            self.lookahead,
            self.lbts,
            self.constrained,
            self.regulating,
            self.advancing
        )
    }
}

/// The parts of time status a release decision reads, taken together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReleaseGate {
    /// Constrained mode is on.
    pub constrained: bool,
    /// Receive-order spec messages flow without an advance request.
    pub asynchronous: bool,
    /// A time-advance request is outstanding.
    pub advancing: bool,
    /// Time named in the last advance request.
    pub requested_time: f64,
    /// Federation LBTS.
    pub federation_lbts: f64,
}

/// Read-only view of time management consulted by the message queue.
pub trait TimeSource: Send + Sync {
    /// Whether the local federate is time-constrained.
    fn is_constrained(&self) -> bool;

    /// Whether the local federate is time-regulating.
    fn is_regulating(&self) -> bool;

    /// Whether receive-order spec messages flow without an advance request.
    fn is_asynchronous(&self) -> bool;

    /// Whether a time-advance request is outstanding.
    fn is_advancing(&self) -> bool;

    /// Time named in the last advance request.
    fn requested_time(&self) -> f64;

    /// Lower bound on the timestamp of anything the federation may still send.
    fn federation_lbts(&self) -> f64;

    /// Everything a release decision needs as one consistent reading.
    ///
    /// The default reads each accessor in turn; sources that can change
    /// concurrently should override it.
    fn release_gate(&self) -> ReleaseGate {
        ReleaseGate {
            constrained: self.is_constrained(),
            asynchronous: self.is_asynchronous(),
            advancing: self.is_advancing(),
            requested_time: self.requested_time(),
            federation_lbts: self.federation_lbts(),
        }
    }
}

#[derive(Debug)]
struct SharedInner {
    status: TimeStatus,
    federation_lbts: f64,
}

/// Lock-guarded [`TimeStatus`] plus the federation LBTS.
///
/// Clones share the same state.
#[derive(Debug, Clone)]
pub struct SharedTimeStatus {
    inner: Arc<RwLock<SharedInner>>,
}

impl Default for SharedTimeStatus {
    fn default() -> Self {
        Self::new(TimeStatus::default())
    }
}

impl SharedTimeStatus {
    /// Share `status`. The federation LBTS starts unbounded.
    pub fn new(status: TimeStatus) -> Self {
        Self {
            inner: Arc::new(RwLock::new(SharedInner { status, federation_lbts: f64::INFINITY })),
        }
    }

    /// Copy of the current status.
    pub fn status(&self) -> TimeStatus {
        self.inner.read().status
    }

    /// Mutate the status under the write lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut TimeStatus) -> R) -> R {
        f(&mut self.inner.write().status)
    }

    /// Replace the status wholesale.
    pub fn set(&self, status: TimeStatus) {
        self.inner.write().status = status;
    }

    /// Publish a new federation LBTS.
    pub fn set_federation_lbts(&self, lbts: f64) {
        self.inner.write().federation_lbts = lbts;
    }
}

impl TimeSource for SharedTimeStatus {
    fn is_constrained(&self) -> bool {
        self.inner.read().status.is_constrained()
    }

    fn is_regulating(&self) -> bool {
        self.inner.read().status.is_regulating()
    }

    fn is_asynchronous(&self) -> bool {
        self.inner.read().status.asynchronous
    }

    fn is_advancing(&self) -> bool {
        self.inner.read().status.is_advance_outstanding()
    }

    fn requested_time(&self) -> f64 {
        self.inner.read().status.requested_time
    }

    fn federation_lbts(&self) -> f64 {
        self.inner.read().federation_lbts
    }

    fn release_gate(&self) -> ReleaseGate {
        let inner = self.inner.read();
        ReleaseGate {
            constrained: inner.status.is_constrained(),
            asynchronous: inner.status.asynchronous,
            advancing: inner.status.is_advance_outstanding(),
            requested_time: inner.status.requested_time,
            federation_lbts: inner.federation_lbts,
        }
    }
}

//! Fedline core.
//!
//! Transport-independent building blocks of a federation: the replicated
//! [`Manifest`] every process keeps for its channel, the dual-queue
//! [`MessageQueue`] that releases messages in an order consistent with both
//! arrival and logical time, and the [`DeliveryScheduler`] that pulls from it.
//!
//! # Components
//!
//! - [`Manifest`]: membership, handles, coordinator, federation existence
//! - [`MessageQueue`]: receive-order and timestamp-order queues gated by a
//!   [`TimeSource`]
//! - [`DeliveryScheduler`]: tick family plus the optional immediate delivery
//!   task
//! - [`Environment`]: time and randomness, swapped for a seeded one in tests
//!
//! Nothing here talks to the network; `fedline-federation` wires these pieces
//! to a group transport.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod env;
pub mod error;
pub mod manifest;
pub mod queue;
pub mod scheduler;
pub mod time;

pub use config::FederationConfig;
pub use env::Environment;
pub use error::{FederationError, HandlerError, SchedulerError, TransportError};
pub use manifest::{FederateInfo, Manifest};
pub use queue::{IncomingHandler, MessageQueue, QueueSnapshot};
pub use scheduler::DeliveryScheduler;
pub use time::{AdvanceState, ReleaseGate, SharedTimeStatus, TimeSource, TimeStatus, TriState};

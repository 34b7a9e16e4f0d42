//! Fedline federation coordination.
//!
//! Runs the federation lifecycle (create, join, resign, destroy) over any
//! group communication transport that provides membership views, best-effort
//! broadcast and acknowledged broadcast.
//!
//! # Architecture
//!
//! The transport hands raw bytes and views to the channel adapter, which
//! decodes frames and tells control traffic from data. Control traffic updates
//! the replicated [`fedline_core::Manifest`]; data is offered to the local
//! federate's [`fedline_core::MessageQueue`], from which its
//! [`fedline_core::DeliveryScheduler`] delivers.
//!
//! # Components
//!
//! - [`Federation`]: lifecycle operations and protocol event handling
//! - [`JoinedFederate`]: the local federate's session (queue and scheduler)
//! - [`GroupTransport`] / [`ChannelHandler`]: the transport boundary
//! - [`SystemEnv`]: production environment (system time, OS randomness)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod federation;
mod system_env;
pub mod transport;

pub use federation::{Federation, JoinedFederate};
pub use system_env::SystemEnv;
pub use transport::{ChannelHandler, GroupTransport, TransportError};

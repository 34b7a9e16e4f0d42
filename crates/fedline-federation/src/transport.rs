//! Group communication transport boundary.
//!
//! A federation channel rides on a group transport that provides membership
//! views and broadcast. The coordination layer only needs the operations
//! below; the in-memory simulation network in `fedline-harness` implements
//! them for tests, and a production binding would wrap a real group
//! communication stack.
//!
//! # Delivery contract
//!
//! - Views and messages reach a member's [`ChannelHandler`] from a single
//!   task, in the order the transport accepted them.
//! - A member sees the view that admits a newcomer before any message the
//!   newcomer sends.
//! - Broadcasts are delivered to every member of the view, the sender
//!   included.
//! - [`GroupTransport::send_reliable`] completes only once every member of
//!   the view at send time has handed the message to its handler.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
pub use fedline_core::TransportError;
use fedline_proto::MemberId;

/// Callbacks from the transport into the coordination layer.
///
/// Invoked from the transport's delivery task. Implementations must not
/// block and must not wait on a reliable broadcast.
pub trait ChannelHandler: Send + Sync {
    /// A new membership view was installed.
    fn view_accepted(&self, members: &[MemberId]);

    /// A broadcast from `source` arrived.
    fn receive(&self, source: MemberId, bytes: Bytes);
}

/// Group transport a federation channel runs over.
#[async_trait]
pub trait GroupTransport: Send + Sync {
    /// Join `channel` as `local`, delivering callbacks to `handler`.
    async fn connect(
        &self,
        channel: &str,
        local: MemberId,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<(), TransportError>;

    /// Leave the channel. Remaining members see a view without us.
    async fn disconnect(&self);

    /// Best-effort broadcast. Never waits.
    fn send(&self, bytes: Bytes) -> Result<(), TransportError>;

    /// Broadcast and wait until every member of the current view has
    /// delivered the message, or `timeout` passes.
    async fn send_reliable(&self, bytes: Bytes, timeout: Duration) -> Result<(), TransportError>;

    /// Current membership view. Empty when not connected.
    fn view(&self) -> Vec<MemberId>;
}

//! Channel adapter.
//!
//! Outbound, turns protocol payloads into frames and hands them to the group
//! transport. Inbound, the [`ChannelListener`] decodes what the transport
//! delivers, tells control traffic from data by opcode, and forwards views
//! and traffic to the coordination layer as [`ChannelEvents`].

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use bytes::Bytes;
use fedline_core::FederationError;
use fedline_proto::{Frame, MemberId, Message, Payload};

use crate::transport::{ChannelHandler, GroupTransport};

/// Protocol events raised by the listener.
pub(crate) trait ChannelEvents: Send + Sync {
    /// A view was installed. Members missing from it have departed.
    fn view_changed(&self, members: &[MemberId]);

    /// Lifecycle or discovery traffic.
    fn control(&self, sender: MemberId, payload: Payload);

    /// Application traffic.
    fn data(&self, sender: MemberId, message: Message);
}

/// Outbound half: frames payloads and broadcasts them.
pub(crate) struct Channel {
    name: String,
    local: MemberId,
    transport: Arc<dyn GroupTransport>,
}

impl Channel {
    pub(crate) fn new(name: String, local: MemberId, transport: Arc<dyn GroupTransport>) -> Self {
        Self { name, local, transport }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn transport(&self) -> &Arc<dyn GroupTransport> {
        &self.transport
    }

    fn encode(&self, payload: Payload, manifest_version: u64) -> Result<Bytes, FederationError> {
        let mut frame = payload.into_frame(self.local)?;
        frame.header.set_manifest_version(manifest_version);
        Ok(frame.to_bytes()?)
    }

    /// Best-effort broadcast to every member, ourselves included.
    pub(crate) fn broadcast(
        &self,
        payload: Payload,
        manifest_version: u64,
    ) -> Result<(), FederationError> {
        let bytes = self.encode(payload, manifest_version)?;
        self.transport.send(bytes)?;
        Ok(())
    }

    /// Broadcast and wait for every current member to deliver it.
    pub(crate) async fn broadcast_reliable(
        &self,
        payload: Payload,
        manifest_version: u64,
        timeout: Duration,
    ) -> Result<(), FederationError> {
        let opcode = payload.opcode();
        let bytes = self.encode(payload, manifest_version)?;

        self.transport.send_reliable(bytes, timeout).await.map_err(|e| {
            tracing::warn!(channel = %self.name, ?opcode, error = %e, "reliable broadcast failed");
            FederationError::from(e)
        })
    }
}

/// Inbound half, registered with the transport on connect.
///
/// Holds the coordination layer weakly so a dropped federation does not stay
/// alive through the transport.
pub(crate) struct ChannelListener<T> {
    channel: String,
    events: Weak<T>,
}

impl<T: ChannelEvents> ChannelListener<T> {
    pub(crate) fn new(channel: String, events: Weak<T>) -> Self {
        Self { channel, events }
    }
}

impl<T: ChannelEvents> ChannelHandler for ChannelListener<T> {
    fn view_accepted(&self, members: &[MemberId]) {
        let Some(events) = self.events.upgrade() else {
            return;
        };

        tracing::debug!(channel = %self.channel, members = members.len(), "view accepted");
        events.view_changed(members);
    }

    fn receive(&self, source: MemberId, bytes: Bytes) {
        let Some(events) = self.events.upgrade() else {
            return;
        };

        let frame = match Frame::decode(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(channel = %self.channel, source = %source, error = %e, "dropping undecodable frame");
                return;
            },
        };

        let sender = frame.header.sender();
        if sender != source {
            tracing::warn!(
                channel = %self.channel,
                source = %source,
                sender = %sender,
                "frame sender differs from transport source"
            );
        }

        let payload = match Payload::from_frame(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(channel = %self.channel, sender = %sender, error = %e, "dropping malformed payload");
                return;
            },
        };

        match payload {
            Payload::Data(message) => {
                tracing::trace!(channel = %self.channel, sender = %sender, size = bytes.len(), "data");
                events.data(sender, message);
            },
            control => {
                tracing::debug!(channel = %self.channel, sender = %sender, opcode = ?control.opcode(), "control");
                events.control(sender, control);
            },
        }
    }
}

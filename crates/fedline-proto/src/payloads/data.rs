//! Messages ordered by the delivery engine.
//!
//! A [`Message`] is what federates exchange once joined. Its [`Category`]
//! and [`Body`] are closed enums: the delivery engine decides release
//! eligibility from them without knowing anything about application
//! payloads, which stay opaque bytes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Handle, payloads::control::ResignNotice};

/// Classification used for release gating and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Attribute value update for a remote object.
    Reflection,
    /// Interaction delivered to subscribers.
    Interaction,
    /// Object discovery notification.
    Discovery,
    /// Object removal.
    Delete,
    /// Control or status callback.
    Other,
}

impl Category {
    /// Reflections, interactions and removals are held back from a
    /// constrained federate until it requests a time advance.
    #[must_use]
    pub const fn is_spec_message(self) -> bool {
        matches!(self, Self::Reflection | Self::Interaction | Self::Delete)
    }
}

/// Message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Body {
    /// Opaque application payload.
    Application(Bytes),
    /// A federate resigned (real or synthesized).
    Resign(ResignNotice),
    /// Time-advance grant sentinel; released as soon as it reaches the head of
    /// the timestamp queue.
    TimeAdvanceGrant,
    /// Federation save started (local bookkeeping, never persisted).
    SaveBegun(String),
    /// Federation save finished (local bookkeeping, never persisted).
    SaveComplete(String),
}

/// Unit of delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Handle of the sending federate (0 when unknown).
    pub source: Handle,
    /// Logical timestamp; `None` for receive-order messages.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<f64>,
    /// Release-gating class.
    pub category: Category,
    /// Deliver straight to the handler, bypassing both queues.
    #[serde(default)]
    pub immediate: bool,
    /// Content.
    pub body: Body,
}

impl Message {
    /// Receive-order application message.
    #[must_use]
    pub fn receive_order(source: Handle, category: Category, payload: impl Into<Bytes>) -> Self {
        Self {
            source,
            timestamp: None,
            category,
            immediate: false,
            body: Body::Application(payload.into()),
        }
    }

    /// Timestamped application message.
    #[must_use]
    pub fn timestamped(
        source: Handle,
        timestamp: f64,
        category: Category,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            source,
            timestamp: Some(timestamp),
            category,
            immediate: false,
            body: Body::Application(payload.into()),
        }
    }

    /// Time-advance grant sentinel for `time`.
    #[must_use]
    pub fn time_advance_grant(source: Handle, time: f64) -> Self {
        Self {
            source,
            timestamp: Some(time),
            category: Category::Other,
            immediate: false,
            body: Body::TimeAdvanceGrant,
        }
    }

    /// Resignation notice as delivered to federates.
    #[must_use]
    pub fn resign(notice: ResignNotice, immediate: bool) -> Self {
        Self {
            source: notice.federate,
            timestamp: None,
            category: Category::Other,
            immediate,
            body: Body::Resign(notice),
        }
    }

    /// Whether this message is the time-advance-grant sentinel.
    #[must_use]
    pub fn is_time_advance_grant(&self) -> bool {
        matches!(self.body, Body::TimeAdvanceGrant)
    }

    /// Whether this message is save bookkeeping that must not be persisted.
    #[must_use]
    pub fn is_save_bookkeeping(&self) -> bool {
        matches!(self.body, Body::SaveBegun(_) | Body::SaveComplete(_))
    }

    /// See [`Category::is_spec_message`].
    #[must_use]
    pub fn is_spec_message(&self) -> bool {
        self.category.is_spec_message()
    }

    /// Mark for immediate delivery.
    #[must_use]
    pub fn with_immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_categories() {
        assert!(Category::Reflection.is_spec_message());
        assert!(Category::Interaction.is_spec_message());
        assert!(Category::Delete.is_spec_message());
        assert!(!Category::Discovery.is_spec_message());
        assert!(!Category::Other.is_spec_message());
    }

    #[test]
    fn grant_is_not_a_spec_message() {
        let grant = Message::time_advance_grant(1, 10.0);
        assert!(grant.is_time_advance_grant());
        assert!(!grant.is_spec_message());
        assert_eq!(grant.timestamp, Some(10.0));
    }

    #[test]
    fn save_bookkeeping_detection() {
        let begun = Message {
            source: 0,
            timestamp: None,
            category: Category::Other,
            immediate: false,
            body: Body::SaveBegun("checkpoint".into()),
        };
        assert!(begun.is_save_bookkeeping());
        assert!(!Message::receive_order(1, Category::Other, vec![1]).is_save_bookkeeping());
    }
}

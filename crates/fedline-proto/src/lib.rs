//! Wire protocol for fedline federations.
//!
//! Every message exchanged on a federation channel is a [`Frame`]: a fixed
//! binary [`FrameHeader`] followed by a CBOR payload. The header's [`Opcode`]
//! tells control traffic (coordinator discovery, manifest sync, lifecycle
//! transitions) apart from data traffic without touching the payload.
//!
//! # Layers
//!
//! - [`FrameHeader`] / [`Frame`]: transport framing, zero-copy parse
//! - [`Payload`]: typed payloads, one per opcode
//! - [`payloads::data::Message`]: the unit the delivery engine orders

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
mod frame;
mod header;
mod opcode;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcode::Opcode;
pub use payloads::{
    Payload,
    control::{
        CreateFederation, DestroyFederation, FederateEntry, JoinRequest, ManifestSnapshot,
        ResignAction, ResignNotice,
    },
    data::{Body, Category, Message},
};

/// Identity of a process on a federation channel.
///
/// Drawn at random when a process connects and never reused. Handles (the
/// small integers federates see) are allocated separately by the manifest.
pub type MemberId = u128;

/// Small integer assigned to each channel member in order of first sighting.
pub type Handle = u32;

//! CBOR-encoded protocol messages.
//!
//! Frame headers are raw binary, payloads use CBOR. The `Payload` enum covers
//! every frame type: coordinator discovery, manifest sync, the four lifecycle
//! transitions, goodbye, and application data.
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness). Decoding an encoded payload under its own opcode yields
//! an equal value.

pub mod control;
pub mod data;

use bytes::BufMut;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Frame, FrameHeader, MemberId, Opcode,
    errors::{ProtocolError, Result},
};

/// All possible frame payloads
///
/// The payload type is determined by the `Opcode` in the frame header, so
/// only the inner struct is serialized (no variant tag in CBOR).
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Who is the coordinator? (empty body)
    FindCoordinator,
    /// Coordinator's manifest
    SetManifest(control::ManifestSnapshot),
    /// Federation created
    CreateFederation(control::CreateFederation),
    /// Federate joined
    JoinFederation(control::JoinRequest),
    /// Federate resigned
    ResignFederation(control::ResignNotice),
    /// Federation destroyed
    DestroyFederation(control::DestroyFederation),
    /// Graceful channel departure (empty body)
    Goodbye,
    /// Application message
    Data(data::Message),
}

fn encode_cbor<T: Serialize>(value: &T, dst: &mut impl BufMut) -> Result<()> {
    ciborium::ser::into_writer(value, dst.writer())
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
}

fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::FindCoordinator => Opcode::FindCoordinator,
            Self::SetManifest(_) => Opcode::SetManifest,
            Self::CreateFederation(_) => Opcode::CreateFederation,
            Self::JoinFederation(_) => Opcode::JoinFederation,
            Self::ResignFederation(_) => Opcode::ResignFederation,
            Self::DestroyFederation(_) => Opcode::DestroyFederation,
            Self::Goodbye => Opcode::Goodbye,
            Self::Data(_) => Opcode::Data,
        }
    }

    /// Encode payload to buffer.
    ///
    /// Serializes only the inner struct, NOT the variant tag. Does not check
    /// the size limit; [`Frame::encode`] does.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        match self {
            Self::FindCoordinator | Self::Goodbye => Ok(()), // Zero-byte payloads
            Self::SetManifest(inner) => encode_cbor(inner, dst),
            Self::CreateFederation(inner) => encode_cbor(inner, dst),
            Self::JoinFederation(inner) => encode_cbor(inner, dst),
            Self::ResignFederation(inner) => encode_cbor(inner, dst),
            Self::DestroyFederation(inner) => encode_cbor(inner, dst),
            Self::Data(inner) => encode_cbor(inner, dst),
        }
    }

    /// Decode payload from bytes based on opcode.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed `MAX_PAYLOAD_SIZE`
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let payload = match opcode {
            Opcode::FindCoordinator => Self::FindCoordinator,
            Opcode::SetManifest => Self::SetManifest(decode_cbor(bytes)?),
            Opcode::CreateFederation => Self::CreateFederation(decode_cbor(bytes)?),
            Opcode::JoinFederation => Self::JoinFederation(decode_cbor(bytes)?),
            Opcode::ResignFederation => Self::ResignFederation(decode_cbor(bytes)?),
            Opcode::DestroyFederation => Self::DestroyFederation(decode_cbor(bytes)?),
            Opcode::Goodbye => Self::Goodbye,
            Opcode::Data => Self::Data(decode_cbor(bytes)?),
        };

        Ok(payload)
    }

    /// Convert payload into a transport frame sent by `sender`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self, sender: MemberId) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(Frame::new(FrameHeader::new(self.opcode(), sender), buf))
    }

    /// Parse payload from a raw transport frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` if the opcode is not recognized
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or(ProtocolError::UnknownOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }
}

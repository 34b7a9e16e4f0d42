//! Frame header implementation with zero-copy parsing.
//!
//! The `FrameHeader` is a fixed 40-byte structure serialized as raw binary
//! (Big Endian). The channel adapter classifies a frame as control or data
//! and learns the logical sender from the header alone, before touching the
//! CBOR payload.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    MemberId, Opcode,
    errors::{ProtocolError, Result},
};

/// Fixed 40-byte frame header (Big Endian network byte order)
///
/// Fields are stored as raw byte arrays so the packed layout has no
/// alignment requirements and every 40-byte pattern is a valid value.
///
/// The `sender` field is the member identity of the process that built the
/// frame. Receivers key manifest updates on it, so it must match the
/// transport-level source.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    // Protocol identification (8 bytes: 0-7)
    magic: [u8; 4],             // 0x46444C4E ("FDLN" in ASCII)
    version: u8,                // 0x01
    flags: u8,                  // reserved, zero
    pub(crate) opcode: [u8; 2], // u16 operation code

    // Payload metadata (8 bytes: 8-15)
    pub(crate) payload_size: [u8; 4],
    reserved: [u8; 4],

    // Routing context (24 bytes: 16-39)
    sender: [u8; 16],          // u128 member identity
    manifest_version: [u8; 8], // u64 sender's manifest version when sent
}

impl FrameHeader {
    /// Size of the serialized header (40 bytes)
    pub const SIZE: usize = 40;

    /// Magic number: "FDLN" in ASCII (0x46444C4E)
    pub const MAGIC: u32 = 0x4644_4C4E;

    /// Current protocol version
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (16 MB)
    pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

    /// Create a new header with the specified opcode and sender.
    #[must_use]
    pub fn new(opcode: Opcode, sender: MemberId) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            flags: 0,
            opcode: opcode.to_u16().to_be_bytes(),
            payload_size: [0; 4],
            reserved: [0; 4],
            sender: sender.to_be_bytes(),
            manifest_version: [0; 8],
        }
    }

    /// Parse header from network bytes (zero-copy, safe)
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if buffer is shorter than 40 bytes
    /// - `ProtocolError::InvalidMagic` if magic number is invalid
    /// - `ProtocolError::UnsupportedVersion` if protocol version is unsupported
    /// - `ProtocolError::PayloadTooLarge` if payload size exceeds maximum
    ///
    /// Cheap checks run first so garbage is rejected before anything else is
    /// read. The opcode is NOT validated here; see [`Self::opcode_enum`].
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize header to bytes (zero-copy)
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Protocol magic number.
    #[must_use]
    pub fn magic(&self) -> u32 {
        u32::from_be_bytes(self.magic)
    }

    /// Protocol version byte.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Operation code as raw u16.
    #[must_use]
    pub fn opcode(&self) -> u16 {
        u16::from_be_bytes(self.opcode)
    }

    /// Operation code as enum. `None` if unrecognized.
    #[must_use]
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u16(self.opcode())
    }

    /// Logical sender of the frame.
    #[must_use]
    pub fn sender(&self) -> MemberId {
        u128::from_be_bytes(self.sender)
    }

    /// Manifest version the sender held when the frame was built.
    ///
    /// Informational; receivers use the version inside a `SetManifest`
    /// payload when deciding whether to install it.
    #[must_use]
    pub fn manifest_version(&self) -> u64 {
        u64::from_be_bytes(self.manifest_version)
    }

    /// Payload size in bytes (max 16 MB).
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }

    /// Update the logical sender.
    pub fn set_sender(&mut self, sender: MemberId) {
        self.sender = sender.to_be_bytes();
    }

    /// Record the sender's manifest version.
    pub fn set_manifest_version(&mut self, version: u64) {
        self.manifest_version = version.to_be_bytes();
    }

    /// Set payload size.
    pub fn set_payload_size(&mut self, size: u32) {
        self.payload_size = size.to_be_bytes();
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("magic", &format!("{:#010x}", self.magic()))
            .field("version", &self.version())
            .field("opcode", &format!("{:#06x}", self.opcode()))
            .field("sender", &format!("{:#034x}", self.sender()))
            .field("manifest_version", &self.manifest_version())
            .field("payload_size", &self.payload_size())
            .finish_non_exhaustive()
    }
}

// Manual PartialEq implementation (can't derive due to packed repr)
impl PartialEq for FrameHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for FrameHeader {}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    impl Arbitrary for FrameHeader {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
            (
                any::<u16>(),                  // opcode (raw, may be unknown)
                any::<u128>(),                 // sender
                any::<u64>(),                  // manifest_version
                0u32..=Self::MAX_PAYLOAD_SIZE, // payload_size
            )
                .prop_map(|(opcode, sender, manifest_version, payload_size)| Self {
                    magic: Self::MAGIC.to_be_bytes(),
                    version: Self::VERSION,
                    flags: 0,
                    opcode: opcode.to_be_bytes(),
                    payload_size: payload_size.to_be_bytes(),
                    reserved: [0; 4],
                    sender: sender.to_be_bytes(),
                    manifest_version: manifest_version.to_be_bytes(),
                })
                .boxed()
        }
    }

    #[test]
    fn header_size() {
        assert_eq!(std::mem::size_of::<FrameHeader>(), FrameHeader::SIZE);
    }

    proptest! {
        #[test]
        fn header_round_trip(header in any::<FrameHeader>()) {
            let bytes = header.to_bytes();
            let parsed = FrameHeader::from_bytes(&bytes).expect("should parse");
            prop_assert_eq!(&header, parsed);
        }
    }

    #[test]
    fn new_header_carries_sender_and_opcode() {
        let header = FrameHeader::new(Opcode::Goodbye, 0xDEAD_BEEF);
        assert_eq!(header.opcode_enum(), Some(Opcode::Goodbye));
        assert_eq!(header.sender(), 0xDEAD_BEEF);
        assert_eq!(header.payload_size(), 0);
        assert_eq!(header.manifest_version(), 0);
    }

    #[test]
    fn reject_short_buffer() {
        let short_buf = [0u8; 20];
        let result = FrameHeader::from_bytes(&short_buf);
        assert_eq!(
            result,
            Err(ProtocolError::FrameTooShort { expected: FrameHeader::SIZE, actual: 20 })
        );
    }

    #[test]
    fn reject_invalid_magic() {
        let mut buf = FrameHeader::new(Opcode::Data, 1).to_bytes();
        buf[0..4].copy_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);

        let result = FrameHeader::from_bytes(&buf);
        assert_eq!(result, Err(ProtocolError::InvalidMagic));
    }

    #[test]
    fn reject_invalid_version() {
        let mut buf = FrameHeader::new(Opcode::Data, 1).to_bytes();
        buf[4] = 0xFF;

        let result = FrameHeader::from_bytes(&buf);
        assert_eq!(result, Err(ProtocolError::UnsupportedVersion(0xFF)));
    }

    #[test]
    fn reject_oversized_payload() {
        let mut buf = FrameHeader::new(Opcode::Data, 1).to_bytes();
        let oversized = FrameHeader::MAX_PAYLOAD_SIZE + 1;
        buf[8..12].copy_from_slice(&oversized.to_be_bytes());

        let result = FrameHeader::from_bytes(&buf);
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })));
    }
}

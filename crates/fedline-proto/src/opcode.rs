//! Frame operation codes.

/// Operation code carried in every frame header.
///
/// Control opcodes drive the coordination protocol; [`Opcode::Data`] carries
/// application messages destined for a federate's message queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Newly connected process asking who the coordinator is
    FindCoordinator = 0x0001,
    /// Coordinator publishing its manifest
    SetManifest = 0x0002,
    /// Federation created with the attached model
    CreateFederation = 0x0010,
    /// Federate joined under the attached name
    JoinFederation = 0x0011,
    /// Federate resigned (full resignation notice attached)
    ResignFederation = 0x0012,
    /// Federation destroyed
    DestroyFederation = 0x0013,
    /// Process leaving the channel gracefully
    Goodbye = 0x0020,
    /// Application message
    Data = 0x0100,
}

impl Opcode {
    /// Every opcode, in wire order.
    pub const ALL: [Self; 8] = [
        Self::FindCoordinator,
        Self::SetManifest,
        Self::CreateFederation,
        Self::JoinFederation,
        Self::ResignFederation,
        Self::DestroyFederation,
        Self::Goodbye,
        Self::Data,
    ];

    /// Raw wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse a raw wire value. `None` if unrecognized.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::FindCoordinator),
            0x0002 => Some(Self::SetManifest),
            0x0010 => Some(Self::CreateFederation),
            0x0011 => Some(Self::JoinFederation),
            0x0012 => Some(Self::ResignFederation),
            0x0013 => Some(Self::DestroyFederation),
            0x0020 => Some(Self::Goodbye),
            0x0100 => Some(Self::Data),
            _ => None,
        }
    }

    /// Whether this opcode belongs to the coordination protocol.
    #[must_use]
    pub const fn is_control(self) -> bool {
        !matches!(self, Self::Data)
    }

    /// Whether senders must use the acknowledged broadcast for this opcode.
    #[must_use]
    pub const fn requires_ack(self) -> bool {
        matches!(
            self,
            Self::CreateFederation
                | Self::JoinFederation
                | Self::ResignFederation
                | Self::DestroyFederation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_values_round_trip() {
        for opcode in Opcode::ALL {
            assert_eq!(Opcode::from_u16(opcode.to_u16()), Some(opcode));
        }
    }

    #[test]
    fn unknown_value_is_rejected() {
        assert_eq!(Opcode::from_u16(0xFFFF), None);
        assert_eq!(Opcode::from_u16(0x0000), None);
    }

    #[test]
    fn only_lifecycle_opcodes_need_acks() {
        let acked: Vec<_> = Opcode::ALL.into_iter().filter(|op| op.requires_ack()).collect();
        assert_eq!(
            acked,
            vec![
                Opcode::CreateFederation,
                Opcode::JoinFederation,
                Opcode::ResignFederation,
                Opcode::DestroyFederation
            ]
        );
        assert!(!Opcode::Data.is_control());
        assert!(Opcode::Goodbye.is_control());
    }
}

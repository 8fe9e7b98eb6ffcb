//! Operation codes for beam authorization frames.
//!
//! Opcodes follow the order of the protocol run:
//!
//! - `0x01-0x0F`: Authorization (beacon, challenge, response, acknowledgment)
//! - `0x10-0x1F`: Liveness (heartbeat and its acknowledgment)

/// Frame operation codes
///
/// # Security
///
/// - **Unknown Opcodes**: [`Opcode::from_u8`] returns `None` for unknown
///   values. Frames carrying them are rejected with
///   [`ProtocolError::InvalidOpcode`](crate::ProtocolError::InvalidOpcode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // Authorization (0x01-0x0F)
    /// GRN authorization request
    Beacon = 0x01,
    /// MOR nonce challenge
    Challenge = 0x02,
    /// GRN answer to a challenge
    Response = 0x03,
    /// MOR confirmation that the session key was established
    SessionAck = 0x04,

    // Liveness (0x10-0x1F)
    /// GRN proof of life
    Heartbeat = 0x10,
    /// MOR receipt of a heartbeat
    HeartbeatAck = 0x11,
}

impl Opcode {
    /// Every opcode, in protocol order.
    pub const ALL: [Opcode; 6] = [
        Opcode::Beacon,
        Opcode::Challenge,
        Opcode::Response,
        Opcode::SessionAck,
        Opcode::Heartbeat,
        Opcode::HeartbeatAck,
    ];

    /// Convert from raw byte
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Beacon),
            0x02 => Some(Self::Challenge),
            0x03 => Some(Self::Response),
            0x04 => Some(Self::SessionAck),
            0x10 => Some(Self::Heartbeat),
            0x11 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }

    /// Convert to raw byte
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_table_is_bijective() {
        for opcode in Opcode::ALL {
            assert_eq!(Opcode::from_u8(opcode.to_u8()), Some(opcode));
        }
    }

    #[test]
    fn unknown_opcodes_are_rejected() {
        assert_eq!(Opcode::from_u8(0x00), None);
        assert_eq!(Opcode::from_u8(0x05), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }
}

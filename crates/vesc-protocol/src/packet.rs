//! VESC CAN Packet Identifiers

use serde::{Deserialize, Serialize};

/// Packet ids carried in bits 8..16 of the extended CAN identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketId {
    /// Set duty cycle (0)
    SetDuty = 0,
    /// Set motor current (1)
    SetCurrent = 1,
    /// Set brake current (2)
    SetCurrentBrake = 2,
    /// RPM, motor current, duty (9)
    Status = 9,
    /// Amp-hours (14)
    Status2 = 14,
    /// Watt-hours (15)
    Status3 = 15,
    /// Temperatures, input current, PID position (16)
    Status4 = 16,
    /// Tachometer, input voltage (27)
    Status5 = 27,
    /// ADC channels, servo (58)
    Status6 = 58,
}

impl PacketId {
    /// Look up a packet id; `None` for anything this crate does not handle
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PacketId::SetDuty),
            1 => Some(PacketId::SetCurrent),
            2 => Some(PacketId::SetCurrentBrake),
            9 => Some(PacketId::Status),
            14 => Some(PacketId::Status2),
            15 => Some(PacketId::Status3),
            16 => Some(PacketId::Status4),
            27 => Some(PacketId::Status5),
            58 => Some(PacketId::Status6),
            _ => None,
        }
    }

    /// Get the raw id value
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Check if this is one of the periodic status messages
    pub fn is_status(&self) -> bool {
        matches!(
            self,
            PacketId::Status
                | PacketId::Status2
                | PacketId::Status3
                | PacketId::Status4
                | PacketId::Status5
                | PacketId::Status6
        )
    }

    /// Minimum payload length for this packet
    pub fn payload_len(&self) -> usize {
        match self {
            PacketId::SetDuty | PacketId::SetCurrent | PacketId::SetCurrentBrake => 4,
            PacketId::Status5 => 6,
            _ => 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_matches_repr() {
        for id in 0..=u8::MAX {
            if let Some(packet) = PacketId::from_u8(id) {
                assert_eq!(packet.as_u8(), id);
            }
        }
    }

    #[test]
    fn test_status_classification() {
        assert!(PacketId::Status6.is_status());
        assert!(!PacketId::SetCurrentBrake.is_status());
        assert_eq!(PacketId::from_u8(17), None); // ping
    }
}

//! VESC Decode Error Types

use crate::ControllerId;
use thiserror::Error;

/// Errors that can occur while decoding a CAN frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Frame uses an 11-bit identifier; VESC traffic is always extended
    #[error("Standard frame 0x{0:03X} is not VESC traffic")]
    NotExtended(u32),

    /// Payload shorter than the layout of its packet
    #[error("Packet {packet_id} from controller {controller_id} too short: need {expected} bytes, got {actual}")]
    Truncated {
        controller_id: ControllerId,
        packet_id: u8,
        expected: usize,
        actual: usize,
    },

    /// Data length code above the classic CAN limit
    #[error("Invalid data length {0}")]
    InvalidLength(usize),
}

impl DecodeError {
    /// Controller the failed frame came from, when the identifier was readable
    pub fn controller_id(&self) -> Option<ControllerId> {
        match self {
            DecodeError::Truncated { controller_id, .. } => Some(*controller_id),
            _ => None,
        }
    }
}

//! Raw CAN Frame

use crate::error::DecodeError;
use crate::ControllerId;
use serde::{Deserialize, Serialize};

/// Maximum payload of a classic CAN frame
pub const MAX_DLC: usize = 8;

/// A raw CAN frame as handed over by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FrameRepr", into = "FrameRepr")]
pub struct CanFrame {
    /// Arbitration id (29 bits when `extended`)
    pub id: u32,
    /// Extended (29-bit) identifier flag
    pub extended: bool,
    /// Payload, only the first `len` bytes are meaningful
    data: [u8; MAX_DLC],
    /// Data length code
    len: u8,
}

/// Serialized form; payload length is validated on the way in
#[derive(Serialize, Deserialize)]
struct FrameRepr {
    id: u32,
    extended: bool,
    data: Vec<u8>,
}

impl TryFrom<FrameRepr> for CanFrame {
    type Error = DecodeError;

    fn try_from(repr: FrameRepr) -> Result<Self, Self::Error> {
        CanFrame::new(repr.id, repr.extended, &repr.data)
    }
}

impl From<CanFrame> for FrameRepr {
    fn from(frame: CanFrame) -> Self {
        Self {
            id: frame.id,
            extended: frame.extended,
            data: frame.data().to_vec(),
        }
    }
}

impl CanFrame {
    /// Create a frame from an id and payload
    pub fn new(id: u32, extended: bool, payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() > MAX_DLC {
            return Err(DecodeError::InvalidLength(payload.len()));
        }

        let mut data = [0u8; MAX_DLC];
        data[..payload.len()].copy_from_slice(payload);

        Ok(Self {
            id,
            extended,
            data,
            len: payload.len() as u8,
        })
    }

    /// Build an extended VESC frame for a packet addressed to `controller_id`
    pub(crate) fn vesc(packet_id: u8, controller_id: ControllerId, payload: &[u8]) -> Self {
        let len = payload.len().min(MAX_DLC);
        let mut data = [0u8; MAX_DLC];
        data[..len].copy_from_slice(&payload[..len]);

        Self {
            id: (u32::from(packet_id) << 8) | u32::from(controller_id),
            extended: true,
            data,
            len: len as u8,
        }
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Controller id (low byte of the identifier)
    pub fn controller_id(&self) -> ControllerId {
        (self.id & 0xFF) as u8
    }

    /// Packet id (second byte of the identifier)
    pub fn packet_id(&self) -> u8 {
        ((self.id >> 8) & 0xFF) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_split() {
        // Status 1 from controller 74
        let frame = CanFrame::new(0x0000_094A, true, &[0; 8]).unwrap();
        assert_eq!(frame.controller_id(), 74);
        assert_eq!(frame.packet_id(), 0x09);

        let frame = CanFrame::new(0x0000_0E4A, true, &[0; 8]).unwrap();
        assert_eq!(frame.packet_id(), 0x0E);
    }

    #[test]
    fn test_rejects_oversized_payload() {
        assert_eq!(
            CanFrame::new(0x94A, true, &[0; 9]),
            Err(DecodeError::InvalidLength(9))
        );
    }

    #[test]
    fn test_vesc_frame_layout() {
        let frame = CanFrame::vesc(2, 74, &[0, 0, 0x0B, 0xB8]);
        assert_eq!(frame.id, 0x0000_024A);
        assert!(frame.extended);
        assert_eq!(frame.data(), &[0, 0, 0x0B, 0xB8]);
    }

    #[test]
    fn test_serde_keeps_payload_length() {
        let frame = CanFrame::vesc(9, 74, &[1, 2, 3]);
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"id":2378,"extended":true,"data":[1,2,3]}"#);
        assert_eq!(serde_json::from_str::<CanFrame>(&json).unwrap(), frame);
    }

    #[test]
    fn test_serde_rejects_oversized_payload() {
        let json = r#"{"id":2378,"extended":true,"data":[0,0,0,0,0,0,0,0,0]}"#;
        assert!(serde_json::from_str::<CanFrame>(json).is_err());
    }
}

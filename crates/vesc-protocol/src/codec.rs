//! Frame Codec
//!
//! Maps raw frames to typed telemetry and command values and back.

use crate::command::{ActuationRequest, MotorCommand};
use crate::error::DecodeError;
use crate::frame::CanFrame;
use crate::packet::PacketId;
use crate::status::StatusMessage;
use crate::ControllerId;
use serde::{Deserialize, Serialize};

/// Result of decoding one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Decoded {
    /// A status packet
    Telemetry {
        controller_id: ControllerId,
        message: StatusMessage,
    },
    /// A motor command seen on the bus
    CommandAck {
        controller_id: ControllerId,
        command: MotorCommand,
    },
    /// Valid VESC frame with a packet id this codec does not interpret
    Unknown {
        controller_id: ControllerId,
        packet_id: u8,
    },
}

impl Decoded {
    /// Controller the frame belongs to
    pub fn controller_id(&self) -> ControllerId {
        match self {
            Decoded::Telemetry { controller_id, .. }
            | Decoded::CommandAck { controller_id, .. }
            | Decoded::Unknown { controller_id, .. } => *controller_id,
        }
    }
}

/// Decode a raw frame
pub fn decode(frame: &CanFrame) -> Result<Decoded, DecodeError> {
    if !frame.extended {
        return Err(DecodeError::NotExtended(frame.id));
    }

    let controller_id = frame.controller_id();
    let raw_packet = frame.packet_id();
    let packet = match PacketId::from_u8(raw_packet) {
        Some(packet) => packet,
        None => {
            return Ok(Decoded::Unknown {
                controller_id,
                packet_id: raw_packet,
            })
        }
    };

    let bytes = frame.data();
    if bytes.len() < packet.payload_len() {
        return Err(DecodeError::Truncated {
            controller_id,
            packet_id: raw_packet,
            expected: packet.payload_len(),
            actual: bytes.len(),
        });
    }

    if let Some(message) = StatusMessage::decode(packet, controller_id, bytes)? {
        return Ok(Decoded::Telemetry {
            controller_id,
            message,
        });
    }

    let raw = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let command = match packet {
        PacketId::SetDuty => MotorCommand::Duty(f64::from(raw) / 100_000.0),
        PacketId::SetCurrent => MotorCommand::Current(f64::from(raw) / 1000.0),
        PacketId::SetCurrentBrake => MotorCommand::BrakeCurrent(f64::from(raw) / 1000.0),
        _ => {
            return Ok(Decoded::Unknown {
                controller_id,
                packet_id: raw_packet,
            })
        }
    };

    Ok(Decoded::CommandAck {
        controller_id,
        command,
    })
}

/// Encode a wire command after clamping it to its bounds
pub fn encode_command(command: &MotorCommand, controller_id: ControllerId) -> CanFrame {
    let bounded = command.clamped().value;
    let value = match bounded {
        MotorCommand::Duty(v) | MotorCommand::Current(v) | MotorCommand::BrakeCurrent(v) => v,
    };
    let raw = (value * bounded.scale()).round() as i32;

    CanFrame::vesc(bounded.packet_id().as_u8(), controller_id, &raw.to_be_bytes())
}

/// Encode a request's target command. Brake ramps are not a wire field;
/// the actuation controller sends the ramped values tick by tick.
pub fn encode(request: &ActuationRequest, controller_id: ControllerId) -> CanFrame {
    encode_command(&request.clamped().value.command(), controller_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn command_value(command: MotorCommand) -> f64 {
        match command {
            MotorCommand::Duty(v) | MotorCommand::Current(v) | MotorCommand::BrakeCurrent(v) => v,
        }
    }

    #[test]
    fn test_encode_duty_layout() {
        // duty 0.5 -> 50000 = 0x0000C350, id = 0 << 8 | 74
        let frame = encode(&ActuationRequest::SetDutyCycle(0.5), 74);
        assert_eq!(frame.id, 0x4A);
        assert_eq!(frame.data(), &[0x00, 0x00, 0xC3, 0x50]);
    }

    #[test]
    fn test_encode_brake_layout() {
        // 3.0A -> 3000 = 0x0BB8
        let frame = encode(
            &ActuationRequest::SetBrakeCurrent {
                current_a: 3.0,
                ramp_time_s: 5.0,
            },
            74,
        );
        assert_eq!(frame.id, 0x024A);
        assert_eq!(frame.data(), &[0x00, 0x00, 0x0B, 0xB8]);
    }

    #[test]
    fn test_encode_negative_current() {
        let frame = encode(&ActuationRequest::SetCurrent(-5.0), 74);
        assert_eq!(frame.data(), &(-5000i32).to_be_bytes());
    }

    #[test]
    fn test_encode_clamps_before_serializing() {
        let frame = encode(&ActuationRequest::SetDutyCycle(3.0), 1);
        let decoded = decode(&frame).unwrap();
        assert_eq!(
            decoded,
            Decoded::CommandAck {
                controller_id: 1,
                command: MotorCommand::Duty(1.0),
            }
        );
    }

    #[test]
    fn test_unknown_packet_reported() {
        // PING (17) from controller 2
        let frame = CanFrame::new(0x1102, true, &[0x40]).unwrap();
        assert_eq!(
            decode(&frame).unwrap(),
            Decoded::Unknown {
                controller_id: 2,
                packet_id: 17,
            }
        );
    }

    #[test]
    fn test_standard_frame_rejected() {
        let frame = CanFrame::new(0x702, false, &[0x00, 0x30]).unwrap();
        assert_eq!(decode(&frame), Err(DecodeError::NotExtended(0x702)));
    }

    #[test]
    fn test_truncated_command() {
        let frame = CanFrame::new(0x024A, true, &[0x00, 0x01]).unwrap();
        let err = decode(&frame).unwrap_err();
        assert_eq!(err.controller_id(), Some(74));
    }

    #[test]
    fn test_status_frame_decodes_to_telemetry() {
        let message = StatusMessage::Status5 {
            tachometer: -42,
            input_voltage: 36.9,
        };
        let decoded = decode(&message.encode(74)).unwrap();
        assert_eq!(
            decoded,
            Decoded::Telemetry {
                controller_id: 74,
                message,
            }
        );
        assert_eq!(decoded.controller_id(), 74);
    }

    proptest! {
        #[test]
        fn prop_request_round_trip(
            id in any::<u8>(),
            kind in 0u8..3,
            value in -20.0f64..20.0,
            ramp in 0.0f64..15.0,
        ) {
            let request = match kind {
                0 => ActuationRequest::SetDutyCycle(value / 10.0),
                1 => ActuationRequest::SetCurrent(value),
                _ => ActuationRequest::SetBrakeCurrent { current_a: value, ramp_time_s: ramp },
            };
            let expected = request.clamped().value.command();

            let decoded = decode(&encode(&request, id)).unwrap();
            match decoded {
                Decoded::CommandAck { controller_id, command } => {
                    prop_assert_eq!(controller_id, id);
                    prop_assert_eq!(command.packet_id(), expected.packet_id());
                    let tolerance = 0.5 / expected.scale();
                    prop_assert!((command_value(command) - command_value(expected)).abs() <= tolerance + 1e-12);
                }
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }

        #[test]
        fn prop_status1_round_trip(
            id in any::<u8>(),
            rpm in any::<i32>(),
            current in -3000i16..3000,
            duty in -1000i16..=1000,
        ) {
            let message = StatusMessage::Status1 {
                rpm,
                motor_current: f64::from(current) / 10.0,
                duty_cycle: f64::from(duty) / 1000.0,
            };
            let decoded = decode(&message.encode(id)).unwrap();
            prop_assert_eq!(decoded, Decoded::Telemetry { controller_id: id, message });
        }
    }
}

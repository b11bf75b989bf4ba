//! VESC Status Message Definitions and Decoding
//!
//! The VESC broadcasts six status packets. Each carries a fixed group of
//! fields as big-endian signed integers with a per-field scale.

use crate::error::DecodeError;
use crate::frame::CanFrame;
use crate::packet::PacketId;
use crate::ControllerId;
use serde::{Deserialize, Serialize};

/// A single decoded telemetry value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TelemetryField {
    /// Electrical RPM
    Rpm(i32),
    /// Motor current (A)
    MotorCurrent(f64),
    /// Duty cycle (-1.0..1.0)
    DutyCycle(f64),
    /// Amp-hours drawn (Ah)
    AmpHoursConsumed(f64),
    /// Amp-hours regenerated (Ah)
    AmpHoursCharged(f64),
    /// Watt-hours drawn (Wh)
    WattHoursConsumed(f64),
    /// Watt-hours regenerated (Wh)
    WattHoursCharged(f64),
    /// MOSFET temperature (°C)
    FetTemperature(f64),
    /// Motor temperature (°C)
    MotorTemperature(f64),
    /// Battery-side current (A)
    InputCurrent(f64),
    /// PID position (degrees)
    PidPosition(f64),
    /// Tachometer counts
    Tachometer(i32),
    /// Battery voltage (V)
    InputVoltage(f64),
    /// External ADC channel 1 (V)
    AdcVoltageExt(f64),
    /// External ADC channel 2 (V)
    AdcVoltageExt2(f64),
    /// External ADC channel 3 (V)
    AdcVoltageExt3(f64),
    /// Servo / PPM input value
    ServoValue(f64),
}

/// One decoded status packet
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StatusMessage {
    /// STATUS: rpm, current, duty
    Status1 {
        rpm: i32,
        motor_current: f64,
        duty_cycle: f64,
    },
    /// STATUS_2: amp-hours
    Status2 {
        amp_hours_consumed: f64,
        amp_hours_charged: f64,
    },
    /// STATUS_3: watt-hours
    Status3 {
        watt_hours_consumed: f64,
        watt_hours_charged: f64,
    },
    /// STATUS_4: temperatures, input current, PID position
    Status4 {
        fet_temperature: f64,
        motor_temperature: f64,
        input_current: f64,
        pid_position: f64,
    },
    /// STATUS_5: tachometer, input voltage
    Status5 { tachometer: i32, input_voltage: f64 },
    /// STATUS_6: ADC channels and servo value
    Status6 {
        adc_1: f64,
        adc_2: f64,
        adc_3: f64,
        servo: f64,
    },
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_i16(bytes: &[u8], offset: usize) -> i16 {
    i16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn scaled_i16(bytes: &[u8], offset: usize, scale: f64) -> f64 {
    f64::from(read_i16(bytes, offset)) / scale
}

fn scaled_i32(bytes: &[u8], offset: usize, scale: f64) -> f64 {
    f64::from(read_i32(bytes, offset)) / scale
}

fn to_i16(value: f64, scale: f64) -> [u8; 2] {
    let raw = (value * scale).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
    raw.to_be_bytes()
}

fn to_i32(value: f64, scale: f64) -> [u8; 4] {
    let raw = (value * scale).round().clamp(i32::MIN as f64, i32::MAX as f64) as i32;
    raw.to_be_bytes()
}

impl StatusMessage {
    /// Decode a status payload. `packet` must be a status packet.
    pub fn decode(
        packet: PacketId,
        controller_id: ControllerId,
        bytes: &[u8],
    ) -> Result<Option<Self>, DecodeError> {
        if !packet.is_status() {
            return Ok(None);
        }

        let expected = packet.payload_len();
        if bytes.len() < expected {
            return Err(DecodeError::Truncated {
                controller_id,
                packet_id: packet.as_u8(),
                expected,
                actual: bytes.len(),
            });
        }

        let message = match packet {
            // rpm: i32, current: i16 / 10, duty: i16 / 1000
            PacketId::Status => StatusMessage::Status1 {
                rpm: read_i32(bytes, 0),
                motor_current: scaled_i16(bytes, 4, 10.0),
                duty_cycle: scaled_i16(bytes, 6, 1000.0),
            },
            // both i32 / 10000
            PacketId::Status2 => StatusMessage::Status2 {
                amp_hours_consumed: scaled_i32(bytes, 0, 10_000.0),
                amp_hours_charged: scaled_i32(bytes, 4, 10_000.0),
            },
            PacketId::Status3 => StatusMessage::Status3 {
                watt_hours_consumed: scaled_i32(bytes, 0, 10_000.0),
                watt_hours_charged: scaled_i32(bytes, 4, 10_000.0),
            },
            // temps and current i16 / 10, pid position i16 / 50
            PacketId::Status4 => StatusMessage::Status4 {
                fet_temperature: scaled_i16(bytes, 0, 10.0),
                motor_temperature: scaled_i16(bytes, 2, 10.0),
                input_current: scaled_i16(bytes, 4, 10.0),
                pid_position: scaled_i16(bytes, 6, 50.0),
            },
            // tacho: i32, voltage: i16 / 10
            PacketId::Status5 => StatusMessage::Status5 {
                tachometer: read_i32(bytes, 0),
                input_voltage: scaled_i16(bytes, 4, 10.0),
            },
            // all i16 / 1000
            PacketId::Status6 => StatusMessage::Status6 {
                adc_1: scaled_i16(bytes, 0, 1000.0),
                adc_2: scaled_i16(bytes, 2, 1000.0),
                adc_3: scaled_i16(bytes, 4, 1000.0),
                servo: scaled_i16(bytes, 6, 1000.0),
            },
            _ => return Ok(None),
        };

        Ok(Some(message))
    }

    /// Packet id this message travels under
    pub fn packet_id(&self) -> PacketId {
        match self {
            StatusMessage::Status1 { .. } => PacketId::Status,
            StatusMessage::Status2 { .. } => PacketId::Status2,
            StatusMessage::Status3 { .. } => PacketId::Status3,
            StatusMessage::Status4 { .. } => PacketId::Status4,
            StatusMessage::Status5 { .. } => PacketId::Status5,
            StatusMessage::Status6 { .. } => PacketId::Status6,
        }
    }

    /// Serialize into a frame as the VESC would broadcast it
    pub fn encode(&self, controller_id: ControllerId) -> CanFrame {
        let mut payload = [0u8; 8];
        let len = match *self {
            StatusMessage::Status1 {
                rpm,
                motor_current,
                duty_cycle,
            } => {
                payload[0..4].copy_from_slice(&rpm.to_be_bytes());
                payload[4..6].copy_from_slice(&to_i16(motor_current, 10.0));
                payload[6..8].copy_from_slice(&to_i16(duty_cycle, 1000.0));
                8
            }
            StatusMessage::Status2 {
                amp_hours_consumed,
                amp_hours_charged,
            } => {
                payload[0..4].copy_from_slice(&to_i32(amp_hours_consumed, 10_000.0));
                payload[4..8].copy_from_slice(&to_i32(amp_hours_charged, 10_000.0));
                8
            }
            StatusMessage::Status3 {
                watt_hours_consumed,
                watt_hours_charged,
            } => {
                payload[0..4].copy_from_slice(&to_i32(watt_hours_consumed, 10_000.0));
                payload[4..8].copy_from_slice(&to_i32(watt_hours_charged, 10_000.0));
                8
            }
            StatusMessage::Status4 {
                fet_temperature,
                motor_temperature,
                input_current,
                pid_position,
            } => {
                payload[0..2].copy_from_slice(&to_i16(fet_temperature, 10.0));
                payload[2..4].copy_from_slice(&to_i16(motor_temperature, 10.0));
                payload[4..6].copy_from_slice(&to_i16(input_current, 10.0));
                payload[6..8].copy_from_slice(&to_i16(pid_position, 50.0));
                8
            }
            StatusMessage::Status5 {
                tachometer,
                input_voltage,
            } => {
                payload[0..4].copy_from_slice(&tachometer.to_be_bytes());
                payload[4..6].copy_from_slice(&to_i16(input_voltage, 10.0));
                6
            }
            StatusMessage::Status6 {
                adc_1,
                adc_2,
                adc_3,
                servo,
            } => {
                payload[0..2].copy_from_slice(&to_i16(adc_1, 1000.0));
                payload[2..4].copy_from_slice(&to_i16(adc_2, 1000.0));
                payload[4..6].copy_from_slice(&to_i16(adc_3, 1000.0));
                payload[6..8].copy_from_slice(&to_i16(servo, 1000.0));
                8
            }
        };

        CanFrame::vesc(self.packet_id().as_u8(), controller_id, &payload[..len])
    }

    /// Split the message into its individual fields
    pub fn fields(&self) -> Vec<TelemetryField> {
        match *self {
            StatusMessage::Status1 {
                rpm,
                motor_current,
                duty_cycle,
            } => vec![
                TelemetryField::Rpm(rpm),
                TelemetryField::MotorCurrent(motor_current),
                TelemetryField::DutyCycle(duty_cycle),
            ],
            StatusMessage::Status2 {
                amp_hours_consumed,
                amp_hours_charged,
            } => vec![
                TelemetryField::AmpHoursConsumed(amp_hours_consumed),
                TelemetryField::AmpHoursCharged(amp_hours_charged),
            ],
            StatusMessage::Status3 {
                watt_hours_consumed,
                watt_hours_charged,
            } => vec![
                TelemetryField::WattHoursConsumed(watt_hours_consumed),
                TelemetryField::WattHoursCharged(watt_hours_charged),
            ],
            StatusMessage::Status4 {
                fet_temperature,
                motor_temperature,
                input_current,
                pid_position,
            } => vec![
                TelemetryField::FetTemperature(fet_temperature),
                TelemetryField::MotorTemperature(motor_temperature),
                TelemetryField::InputCurrent(input_current),
                TelemetryField::PidPosition(pid_position),
            ],
            StatusMessage::Status5 {
                tachometer,
                input_voltage,
            } => vec![
                TelemetryField::Tachometer(tachometer),
                TelemetryField::InputVoltage(input_voltage),
            ],
            StatusMessage::Status6 {
                adc_1,
                adc_2,
                adc_3,
                servo,
            } => vec![
                TelemetryField::AdcVoltageExt(adc_1),
                TelemetryField::AdcVoltageExt2(adc_2),
                TelemetryField::AdcVoltageExt3(adc_3),
                TelemetryField::ServoValue(servo),
            ],
        }
    }
}

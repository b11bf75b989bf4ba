//! VESC CAN Protocol Implementation
//!
//! This crate decodes the multiplexed VESC status stream and encodes motor
//! commands for the CAN bus. It does not own a transport; frames go in and
//! out as [`CanFrame`] values.

mod codec;
mod command;
mod error;
mod frame;
mod packet;
mod simulator;
mod status;

pub use codec::{decode, encode, encode_command, Decoded};
pub use command::{ActuationRequest, Clamped, MotorCommand};
pub use error::DecodeError;
pub use frame::CanFrame;
pub use packet::PacketId;
pub use simulator::SimulatedVesc;
pub use status::{StatusMessage, TelemetryField};

/// Identifier of a node on the CAN bus (low byte of the extended id)
pub type ControllerId = u8;

/// Command bounds enforced before anything is serialized
pub mod limits {
    /// Minimum duty cycle
    pub const DUTY_MIN: f64 = -1.0;
    /// Maximum duty cycle
    pub const DUTY_MAX: f64 = 1.0;
    /// Minimum drive current (A)
    pub const CURRENT_MIN_A: f64 = -10.0;
    /// Maximum drive current (A)
    pub const CURRENT_MAX_A: f64 = 10.0;
    /// Minimum brake current (A)
    pub const BRAKE_CURRENT_MIN_A: f64 = 0.0;
    /// Maximum brake current (A)
    pub const BRAKE_CURRENT_MAX_A: f64 = 10.0;
    /// Shortest accepted brake ramp (s)
    pub const BRAKE_RAMP_MIN_S: f64 = 3.0;
    /// Longest accepted brake ramp (s)
    pub const BRAKE_RAMP_MAX_S: f64 = 10.0;
}

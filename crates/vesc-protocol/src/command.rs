//! Motor Commands and Actuation Requests

use crate::limits;
use crate::packet::PacketId;
use serde::{Deserialize, Serialize};

/// A value after bounds enforcement, with a flag telling whether it moved
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Clamped<T> {
    /// The value that will actually be used
    pub value: T,
    /// True if the input was out of range (or not finite) and got adjusted
    pub adjusted: bool,
}

fn clamp(value: f64, min: f64, max: f64, fallback: f64) -> Clamped<f64> {
    if !value.is_finite() {
        return Clamped {
            value: fallback,
            adjusted: true,
        };
    }

    let bounded = value.clamp(min, max);
    Clamped {
        value: bounded,
        adjusted: bounded != value,
    }
}

/// A single command as it travels on the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MotorCommand {
    /// Duty cycle (-1.0..1.0)
    Duty(f64),
    /// Drive current (A)
    Current(f64),
    /// Brake current (A, positive)
    BrakeCurrent(f64),
}

impl MotorCommand {
    /// Packet id used to send this command
    pub fn packet_id(&self) -> PacketId {
        match self {
            MotorCommand::Duty(_) => PacketId::SetDuty,
            MotorCommand::Current(_) => PacketId::SetCurrent,
            MotorCommand::BrakeCurrent(_) => PacketId::SetCurrentBrake,
        }
    }

    /// Wire scale of the 32-bit payload
    pub(crate) fn scale(&self) -> f64 {
        match self {
            MotorCommand::Duty(_) => 100_000.0,
            MotorCommand::Current(_) | MotorCommand::BrakeCurrent(_) => 1000.0,
        }
    }

    /// Apply the command bounds
    pub fn clamped(&self) -> Clamped<MotorCommand> {
        match *self {
            MotorCommand::Duty(duty) => {
                let c = clamp(duty, limits::DUTY_MIN, limits::DUTY_MAX, 0.0);
                Clamped {
                    value: MotorCommand::Duty(c.value),
                    adjusted: c.adjusted,
                }
            }
            MotorCommand::Current(amps) => {
                let c = clamp(amps, limits::CURRENT_MIN_A, limits::CURRENT_MAX_A, 0.0);
                Clamped {
                    value: MotorCommand::Current(c.value),
                    adjusted: c.adjusted,
                }
            }
            MotorCommand::BrakeCurrent(amps) => {
                let c = clamp(
                    amps,
                    limits::BRAKE_CURRENT_MIN_A,
                    limits::BRAKE_CURRENT_MAX_A,
                    0.0,
                );
                Clamped {
                    value: MotorCommand::BrakeCurrent(c.value),
                    adjusted: c.adjusted,
                }
            }
        }
    }

    /// True for a zero duty/current command, which stops the motor
    pub fn is_stop(&self) -> bool {
        matches!(self, MotorCommand::Duty(v) | MotorCommand::Current(v) if *v == 0.0)
    }
}

/// A request submitted to the actuation controller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ActuationRequest {
    /// Fire-and-forget duty cycle
    SetDutyCycle(f64),
    /// Fire-and-forget drive current (A)
    SetCurrent(f64),
    /// Ramped brake intervention
    SetBrakeCurrent { current_a: f64, ramp_time_s: f64 },
}

impl ActuationRequest {
    /// Zero duty cycle, the emergency stop
    pub const STOP: ActuationRequest = ActuationRequest::SetDutyCycle(0.0);

    /// Apply all bounds; `adjusted` is set if any field moved
    pub fn clamped(&self) -> Clamped<ActuationRequest> {
        match *self {
            ActuationRequest::SetDutyCycle(duty) => {
                let c = clamp(duty, limits::DUTY_MIN, limits::DUTY_MAX, 0.0);
                Clamped {
                    value: ActuationRequest::SetDutyCycle(c.value),
                    adjusted: c.adjusted,
                }
            }
            ActuationRequest::SetCurrent(amps) => {
                let c = clamp(amps, limits::CURRENT_MIN_A, limits::CURRENT_MAX_A, 0.0);
                Clamped {
                    value: ActuationRequest::SetCurrent(c.value),
                    adjusted: c.adjusted,
                }
            }
            ActuationRequest::SetBrakeCurrent {
                current_a,
                ramp_time_s,
            } => {
                let current = clamp(
                    current_a,
                    limits::BRAKE_CURRENT_MIN_A,
                    limits::BRAKE_CURRENT_MAX_A,
                    0.0,
                );
                let ramp = clamp(
                    ramp_time_s,
                    limits::BRAKE_RAMP_MIN_S,
                    limits::BRAKE_RAMP_MAX_S,
                    limits::BRAKE_RAMP_MIN_S,
                );
                Clamped {
                    value: ActuationRequest::SetBrakeCurrent {
                        current_a: current.value,
                        ramp_time_s: ramp.value,
                    },
                    adjusted: current.adjusted || ramp.adjusted,
                }
            }
        }
    }

    /// Wire command carrying the request's target value
    pub fn command(&self) -> MotorCommand {
        match *self {
            ActuationRequest::SetDutyCycle(duty) => MotorCommand::Duty(duty),
            ActuationRequest::SetCurrent(amps) => MotorCommand::Current(amps),
            ActuationRequest::SetBrakeCurrent { current_a, .. } => {
                MotorCommand::BrakeCurrent(current_a)
            }
        }
    }

    /// True for a zero duty/current request
    pub fn is_emergency_stop(&self) -> bool {
        match self {
            ActuationRequest::SetBrakeCurrent { .. } => false,
            _ => self.command().is_stop(),
        }
    }

    /// True for a ramped brake request
    pub fn is_brake(&self) -> bool {
        matches!(self, ActuationRequest::SetBrakeCurrent { .. })
    }
}

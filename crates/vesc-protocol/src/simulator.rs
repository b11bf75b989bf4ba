//! Simulated VESC Node
//!
//! Stands in for a real controller when no CAN transport is attached. It
//! broadcasts the six status packets and reacts to duty, current and brake
//! commands addressed to it with a crude first-order motor model.

use crate::codec::{decode, Decoded};
use crate::command::MotorCommand;
use crate::frame::CanFrame;
use crate::status::StatusMessage;
use crate::ControllerId;
use std::time::Duration;
use tracing::{debug, info};

/// RPM reached at full duty
const MAX_RPM: f64 = 3000.0;
/// RPM gained per amp per second under current control
const RPM_PER_AMP_SECOND: f64 = 120.0;
/// RPM shed per brake amp per second
const BRAKE_RPM_PER_AMP_SECOND: f64 = 150.0;
/// Duty-control response time constant (s)
const DUTY_TIME_CONSTANT_S: f64 = 0.5;
/// Open-circuit battery voltage
const NOMINAL_VOLTAGE: f64 = 36.0;

#[derive(Debug, Clone, Copy)]
enum Drive {
    Coast,
    Duty(f64),
    Current(f64),
    Brake(f64),
}

/// A simulated controller on the bus
pub struct SimulatedVesc {
    controller_id: ControllerId,
    drive: Drive,
    rpm: f64,
    motor_current: f64,
    amp_hours: f64,
    amp_hours_charged: f64,
    watt_hours: f64,
    watt_hours_charged: f64,
    tachometer: f64,
    fet_temp: f64,
}

impl SimulatedVesc {
    /// Create a simulated controller at rest
    pub fn new(controller_id: ControllerId) -> Self {
        info!("Creating simulated VESC with controller id {}", controller_id);
        Self {
            controller_id,
            drive: Drive::Coast,
            rpm: 0.0,
            motor_current: 0.0,
            amp_hours: 0.0,
            amp_hours_charged: 0.0,
            watt_hours: 0.0,
            watt_hours_charged: 0.0,
            tachometer: 0.0,
            fet_temp: 25.0,
        }
    }

    /// Controller id this node answers to
    pub fn controller_id(&self) -> ControllerId {
        self.controller_id
    }

    /// Current motor speed
    pub fn rpm(&self) -> f64 {
        self.rpm
    }

    /// Force the motor speed and hold it with the matching duty cycle
    pub fn set_rpm(&mut self, rpm: f64) {
        self.rpm = rpm;
        self.drive = Drive::Duty((rpm / MAX_RPM).clamp(-1.0, 1.0));
    }

    /// Feed a frame from the bus. Frames for other controllers are ignored.
    /// Returns true if the frame changed the drive mode.
    pub fn receive(&mut self, frame: &CanFrame) -> bool {
        let command = match decode(frame) {
            Ok(Decoded::CommandAck {
                controller_id,
                command,
            }) if controller_id == self.controller_id => command,
            _ => return false,
        };

        debug!("Simulated VESC {} received {:?}", self.controller_id, command);
        self.drive = match command {
            MotorCommand::Duty(d) => Drive::Duty(d),
            MotorCommand::Current(a) => Drive::Current(a),
            MotorCommand::BrakeCurrent(a) => Drive::Brake(a),
        };
        true
    }

    /// Advance the motor model
    pub fn step(&mut self, dt: Duration) {
        let dt_s = dt.as_secs_f64();

        match self.drive {
            Drive::Coast => {
                self.motor_current = 0.0;
            }
            Drive::Duty(duty) => {
                let target = duty * MAX_RPM;
                let alpha = (dt_s / DUTY_TIME_CONSTANT_S).min(1.0);
                let delta = (target - self.rpm) * alpha;
                self.rpm += delta;
                self.motor_current = if dt_s > 0.0 {
                    delta / dt_s / RPM_PER_AMP_SECOND
                } else {
                    0.0
                };
            }
            Drive::Current(amps) => {
                self.rpm = (self.rpm + amps * RPM_PER_AMP_SECOND * dt_s).clamp(-MAX_RPM, MAX_RPM);
                self.motor_current = amps;
            }
            Drive::Brake(amps) => {
                let shed = amps * BRAKE_RPM_PER_AMP_SECOND * dt_s;
                self.rpm = if self.rpm > 0.0 {
                    (self.rpm - shed).max(0.0)
                } else {
                    (self.rpm + shed).min(0.0)
                };
                self.motor_current = -amps;
            }
        }

        let hours = dt_s / 3600.0;
        let voltage = self.input_voltage();
        if self.motor_current >= 0.0 {
            self.amp_hours += self.motor_current * hours;
            self.watt_hours += self.motor_current * voltage * hours;
        } else {
            self.amp_hours_charged += -self.motor_current * hours;
            self.watt_hours_charged += -self.motor_current * voltage * hours;
        }
        self.tachometer += self.rpm / 60.0 * dt_s * 6.0;
        self.fet_temp += (25.0 + self.motor_current.abs() * 0.8 - self.fet_temp) * (dt_s / 30.0).min(1.0);
    }

    fn input_voltage(&self) -> f64 {
        NOMINAL_VOLTAGE - self.motor_current * 0.05
    }

    /// The six status packets describing the current state
    pub fn status_frames(&self) -> Vec<CanFrame> {
        let messages = [
            StatusMessage::Status1 {
                rpm: self.rpm.round() as i32,
                motor_current: self.motor_current,
                duty_cycle: (self.rpm / MAX_RPM).clamp(-1.0, 1.0),
            },
            StatusMessage::Status2 {
                amp_hours_consumed: self.amp_hours,
                amp_hours_charged: self.amp_hours_charged,
            },
            StatusMessage::Status3 {
                watt_hours_consumed: self.watt_hours,
                watt_hours_charged: self.watt_hours_charged,
            },
            StatusMessage::Status4 {
                fet_temperature: self.fet_temp,
                motor_temperature: self.fet_temp + 5.0,
                input_current: self.motor_current * (self.rpm.abs() / MAX_RPM),
                pid_position: 0.0,
            },
            StatusMessage::Status5 {
                tachometer: self.tachometer.round() as i32,
                input_voltage: self.input_voltage(),
            },
            StatusMessage::Status6 {
                adc_1: 0.0,
                adc_2: 0.0,
                adc_3: 0.0,
                servo: 0.0,
            },
        ];

        messages
            .iter()
            .map(|m| m.encode(self.controller_id))
            .collect()
    }
}

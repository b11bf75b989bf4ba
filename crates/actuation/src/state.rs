//! Brake Sequence State Machine
//!
//! Idle -> RampingUp -> Holding -> Releasing -> Cooldown -> Idle.
//! Ramp, hold and release progress by one control period per tick so the
//! sequence is deterministic for a given tick rate; only the cooldown is
//! measured against the clock.

use crate::{ActuationConfig, Rejected};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use vesc_protocol::MotorCommand;

/// Phase of the brake sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Idle,
    RampingUp,
    Holding,
    Releasing,
    Cooldown,
}

impl Phase {
    /// Phases that emit a brake frame every tick
    pub fn is_active(&self) -> bool {
        matches!(self, Phase::RampingUp | Phase::Holding | Phase::Releasing)
    }
}

/// Actuation state of one controller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActuationState {
    pub phase: Phase,
    /// Brake current the sequence ramps to (A)
    pub target_current: f64,
    /// Ramp duration of the active sequence
    pub ramp_time: Duration,
    /// Time spent in the current phase
    pub elapsed_ramp_time: Duration,
    /// End of the cooldown, once one has started
    pub cooldown_until: Option<Instant>,
    /// Last command emitted for this controller
    pub last_command: Option<MotorCommand>,
}

fn fraction(elapsed: Duration, total: Duration) -> f64 {
    if total.is_zero() {
        1.0
    } else {
        (elapsed.as_secs_f64() / total.as_secs_f64()).min(1.0)
    }
}

impl ActuationState {
    /// Create an idle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a new brake sequence may start at `now`
    pub fn check_brake_allowed(&self, now: Instant) -> Result<(), Rejected> {
        match self.phase {
            Phase::Idle => Ok(()),
            Phase::Cooldown => match self.cooldown_until {
                Some(until) if now < until => Err(Rejected::CooldownActive {
                    remaining: until - now,
                }),
                _ => Ok(()),
            },
            phase => Err(Rejected::BusyRamping { phase }),
        }
    }

    /// Begin a ramped brake sequence
    pub fn start_brake(&mut self, current_a: f64, ramp_time_s: f64) {
        self.phase = Phase::RampingUp;
        self.target_current = current_a;
        self.ramp_time = crate::seconds(ramp_time_s);
        self.elapsed_ramp_time = Duration::ZERO;
        self.cooldown_until = None;
    }

    /// Drop any sequence immediately, skipping release and cooldown. A
    /// cooldown that is already running is kept.
    pub fn emergency_stop(&mut self, command: MotorCommand) {
        if self.phase == Phase::Cooldown {
            self.last_command = Some(command);
            return;
        }
        *self = Self {
            last_command: Some(command),
            ..Self::default()
        };
    }

    /// Record a fire-and-forget command
    pub fn record_command(&mut self, command: MotorCommand) {
        self.last_command = Some(command);
    }

    /// Advance one control period; returns the brake command to send, if any
    pub fn tick(&mut self, now: Instant, period: Duration, config: &ActuationConfig) -> Option<MotorCommand> {
        let command = match self.phase {
            Phase::Idle => None,
            Phase::RampingUp => {
                self.elapsed_ramp_time += period;
                let f = fraction(self.elapsed_ramp_time, self.ramp_time);
                if f >= 1.0 {
                    self.phase = Phase::Holding;
                    self.elapsed_ramp_time = Duration::ZERO;
                }
                Some(MotorCommand::BrakeCurrent(self.target_current * f))
            }
            Phase::Holding => {
                self.elapsed_ramp_time += period;
                if self.elapsed_ramp_time >= config.hold_duration() {
                    self.phase = Phase::Releasing;
                    self.elapsed_ramp_time = Duration::ZERO;
                }
                Some(MotorCommand::BrakeCurrent(self.target_current))
            }
            Phase::Releasing => {
                self.elapsed_ramp_time += period;
                let f = fraction(self.elapsed_ramp_time, config.release_duration());
                if f >= 1.0 {
                    self.phase = Phase::Cooldown;
                    self.elapsed_ramp_time = Duration::ZERO;
                    self.cooldown_until = Some(now + config.cooldown_duration());
                }
                Some(MotorCommand::BrakeCurrent(self.target_current * (1.0 - f)))
            }
            Phase::Cooldown => {
                if self.cooldown_until.map_or(true, |until| now >= until) {
                    self.phase = Phase::Idle;
                    self.target_current = 0.0;
                    self.cooldown_until = None;
                }
                None
            }
        };

        if command.is_some() {
            self.last_command = command;
        }
        command
    }
}

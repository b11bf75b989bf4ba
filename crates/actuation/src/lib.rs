//! Bounded Actuation Controller
//!
//! Accepts duty, current and ramped brake requests per controller, clamps
//! them to their bounds and turns them into command frames on a fixed
//! control tick. Brake requests follow a ramp / hold / release / cooldown
//! profile; a zero duty or current request is an emergency stop that
//! preempts any sequence on the next tick.

mod controller;
mod state;

pub use controller::{Accepted, ActuationController};
pub use state::{ActuationState, Phase};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use vesc_protocol::ControllerId;

/// Reasons a request is refused. Refused requests are never queued.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejected {
    /// Target was never discovered or has been lost
    #[error("Controller {0} is not connected")]
    UnknownController(ControllerId),

    /// A brake sequence finished recently
    #[error("Brake cooldown active for another {remaining:?}")]
    CooldownActive { remaining: Duration },

    /// A brake sequence is running or already queued
    #[error("Brake sequence in progress ({phase:?})")]
    BusyRamping { phase: Phase },
}

/// Control loop timing and brake profile
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuationConfig {
    /// Outgoing command rate
    pub tick_hz: f64,
    /// Time at full brake current after the ramp
    pub hold_s: f64,
    /// Time to ramp brake current back to zero
    pub release_s: f64,
    /// Minimum gap between the end of one brake sequence and the next
    pub cooldown_s: f64,
}

impl Default for ActuationConfig {
    fn default() -> Self {
        Self {
            tick_hz: 10.0,
            hold_s: 1.0,
            release_s: 1.0,
            cooldown_s: 3.0,
        }
    }
}

fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_nanos((value * 1e9).round() as u64)
    } else {
        Duration::ZERO
    }
}

impl ActuationConfig {
    /// Control period
    pub fn tick_period(&self) -> Duration {
        let hz = if self.tick_hz.is_finite() && self.tick_hz > 0.0 {
            self.tick_hz
        } else {
            Self::default().tick_hz
        };
        seconds(1.0 / hz)
    }

    pub fn hold_duration(&self) -> Duration {
        seconds(self.hold_s)
    }

    pub fn release_duration(&self) -> Duration {
        seconds(self.release_s)
    }

    pub fn cooldown_duration(&self) -> Duration {
        seconds(self.cooldown_s)
    }
}

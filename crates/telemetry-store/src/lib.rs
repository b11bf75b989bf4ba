//! Telemetry Store
//!
//! Keeps one record per controller id seen on the bus: the latest value of
//! every status field plus connection liveness (Discovered, Live, Stale,
//! Lost). Owned by the runtime and shared by reference between the
//! ingestion, control and evaluation loops.

mod registry;
mod snapshot;

pub use registry::{
    ConnectionState, ControllerRecord, ControllerRegistry, RegistryStats, Transition,
};
pub use snapshot::{MotorReport, PowerReport, SensorReport, TelemetryReport, TelemetrySnapshot};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vesc_protocol::ControllerId;

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Controller {0} has never been seen on the bus")]
    UnknownController(ControllerId),
    #[error("Controller {0} is lost")]
    Lost(ControllerId),
}

/// Liveness timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Silence before a controller is Stale (5 missed 50 Hz periods)
    pub stale_timeout_ms: u64,
    /// Silence before a controller is Lost
    pub lost_timeout_ms: u64,
    /// Time after start during which new ids may still appear
    pub discovery_settle_ms: u64,
    /// Period of the staleness sweep
    pub sweep_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_timeout_ms: 100,
            lost_timeout_ms: 2000,
            discovery_settle_ms: 6000,
            sweep_interval_ms: 20,
        }
    }
}

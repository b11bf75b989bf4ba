//! Vehicle Safety Runtime
//!
//! Wires the VESC codec, telemetry registry, bounded actuation controller
//! and collision-warning engine into concurrent tokio loops:
//! - CAN ingestion into the registry
//! - Fixed-rate actuation control tick
//! - Liveness sweep
//! - Detection evaluation and brake requests

pub mod config;
pub mod logging;
pub mod sim;
pub mod system;

pub use config::{LoggingConfig, RuntimeConfig, SafetyConfig, SimulatorConfig};
pub use logging::init_logging;
pub use sim::run_simulator;
pub use system::SafetySystem;

use thiserror::Error;
use vesc_protocol::ControllerId;

/// Runtime error types
#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("Failed to install logger: {0}")]
    Logging(String),

    #[error("Controllers not discovered: {0:?}")]
    ControllersMissing(Vec<ControllerId>),

    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

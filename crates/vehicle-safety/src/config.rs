//! Layered configuration
//!
//! Built-in defaults, then an optional TOML file, then environment
//! variables such as `VESC_SAFETY_ACTUATION__TICK_HZ=20`.

use crate::SafetyError;
use actuation::ActuationConfig;
use config::{Config, Environment, File};
use fcw::{AlertConfig, FcwConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use telemetry_store::RegistryConfig;
use tracing::info;
use vesc_protocol::ControllerId;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "VESC_SAFETY";

/// Logging output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Max level: trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Loop wiring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Controller whose speed feeds the risk engine and which receives
    /// brake requests. Lowest connected id when unset.
    pub target_controller: Option<ControllerId>,
    /// Drop records once they are Lost
    pub purge_lost: bool,
    /// Capacity of the frame and detection channels
    pub channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            target_controller: None,
            purge_lost: false,
            channel_capacity: 256,
        }
    }
}

/// Simulated controller used by the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub controller_id: ControllerId,
    /// Status broadcast rate
    pub status_hz: f64,
    /// Speed the simulated motor starts at
    pub initial_rpm: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            controller_id: 74,
            status_hz: 50.0,
            initial_rpm: 900.0,
        }
    }
}

/// Complete system configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub registry: RegistryConfig,
    pub actuation: ActuationConfig,
    pub fcw: FcwConfig,
    pub alert: AlertConfig,
    pub runtime: RuntimeConfig,
    pub simulator: SimulatorConfig,
    pub logging: LoggingConfig,
}

impl SafetyConfig {
    /// Load defaults, then `path` if given and present, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, SafetyError> {
        Self::load_with_env(path, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, SafetyError> {
        let mut builder = Config::builder().add_source(Config::try_from(&SafetyConfig::default())?);
        if let Some(path) = path {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path).required(false));
        }

        let config = builder
            .add_source(env.prefix_separator("_").separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX).source(Some(source))
    }

    #[test]
    fn test_defaults() {
        let config = SafetyConfig::load_with_env(None, env(&[])).unwrap();
        assert_eq!(config.registry.stale_timeout_ms, 100);
        assert_eq!(config.actuation.tick_hz, 10.0);
        assert_eq!(config.fcw.confidence_threshold, 0.7);
        assert_eq!(config.alert.cooldown_s, 2.0);
        assert_eq!(config.runtime.target_controller, None);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_overrides() {
        let config = SafetyConfig::load_with_env(
            None,
            env(&[
                ("VESC_SAFETY_ACTUATION__TICK_HZ", "20"),
                ("VESC_SAFETY_RUNTIME__TARGET_CONTROLLER", "2"),
                ("VESC_SAFETY_LOGGING__JSON", "true"),
            ]),
        )
        .unwrap();
        assert_eq!(config.actuation.tick_hz, 20.0);
        assert_eq!(config.runtime.target_controller, Some(2));
        assert!(config.logging.json);
        assert_eq!(config.actuation.cooldown_s, 3.0);
    }

    #[test]
    fn test_missing_file_is_optional() {
        let config =
            SafetyConfig::load_with_env(Some(Path::new("/nonexistent/safety.toml")), env(&[]))
                .unwrap();
        assert_eq!(config.simulator.controller_id, 74);
    }
}

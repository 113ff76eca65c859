use crate::downlink::DEFAULT_PACKET_SIZE;
use crate::radio::{SimulationConfig, MAX_MO_SIZE};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::path::Path;
use thiserror::Error;

// Radio cycle budgets
const MAX_CONFIG_CYCLES: u32 = 30;
const MAX_WAIT_CYCLES: u32 = 3000;
const MAX_TRANSCEIVE_CYCLES: u32 = 140;
const MAX_WRITE_CYCLES: u32 = 15;
const MAX_READ_CYCLES: u32 = 15;

const CONTROL_CYCLE_MS: u64 = 120;

const_assert!(DEFAULT_PACKET_SIZE <= MAX_MO_SIZE);
const_assert!(DEFAULT_PACKET_SIZE > 0);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Cycle budgets and packet layout for the radio link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub max_config_cycles: u32,
    /// Default for the ground-writable `radio.checkin_interval`.
    pub max_wait_cycles: u32,
    pub max_transceive_cycles: u32,
    pub max_write_cycles: u32,
    pub max_read_cycles: u32,
    pub packet_size: usize,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            max_config_cycles: MAX_CONFIG_CYCLES,
            max_wait_cycles: MAX_WAIT_CYCLES,
            max_transceive_cycles: MAX_TRANSCEIVE_CYCLES,
            max_write_cycles: MAX_WRITE_CYCLES,
            max_read_cycles: MAX_READ_CYCLES,
            packet_size: DEFAULT_PACKET_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightConfig {
    pub control_cycle_ms: u64,
    pub radio: RadioConfig,
    pub simulation: SimulationConfig,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            control_cycle_ms: CONTROL_CYCLE_MS,
            radio: RadioConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl FlightConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parses and validates. Missing keys take their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: FlightConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let radio = &self.radio;
        let budgets = [
            ("max_config_cycles", radio.max_config_cycles),
            ("max_wait_cycles", radio.max_wait_cycles),
            ("max_transceive_cycles", radio.max_transceive_cycles),
            ("max_write_cycles", radio.max_write_cycles),
            ("max_read_cycles", radio.max_read_cycles),
        ];
        if let Some((name, _)) = budgets.iter().find(|(_, cycles)| *cycles == 0) {
            return Err(ConfigError::Invalid(format!("radio.{name} must be nonzero")));
        }
        if radio.packet_size == 0 || radio.packet_size > MAX_MO_SIZE {
            return Err(ConfigError::Invalid(format!(
                "radio.packet_size must be in 1..={MAX_MO_SIZE}, got {}",
                radio.packet_size
            )));
        }
        if self.control_cycle_ms == 0 {
            return Err(ConfigError::Invalid("control_cycle_ms must be nonzero".to_string()));
        }
        Ok(())
    }
}

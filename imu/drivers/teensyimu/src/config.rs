use imu_traits::ImuError;
use serde::Deserialize;

pub const DEFAULT_PORT: &str = "/dev/ttyACM0";
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriverConfig {
    /// Device path, e.g. `/dev/ttyACM0` or `COM3`
    #[serde(default = "default_port")]
    pub port: String,
    /// Bits per second
    #[serde(default = "default_baud")]
    pub baud: u32,
}

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}

fn default_baud() -> u32 {
    DEFAULT_BAUD_RATE
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud: default_baud(),
        }
    }
}

impl DriverConfig {
    pub fn new(port: impl Into<String>, baud: u32) -> Self {
        Self {
            port: port.into(),
            baud,
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ImuError> {
        let config: DriverConfig = toml::from_str(text)
            .map_err(|e| ImuError::ConfigurationError(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ImuError> {
        if self.port.trim().is_empty() {
            return Err(ImuError::ConfigurationError(
                "serial port must not be empty".to_string(),
            ));
        }
        if self.baud == 0 {
            return Err(ImuError::ConfigurationError(
                "baud rate must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

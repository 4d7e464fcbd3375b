use std::fmt;
use thiserror::Error;

// --- Basic Types ---
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Vector3 { x, y, z }
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vector3(x={}, y={}, z={})", self.x, self.y, self.z)
    }
}

// --- Standard IMU Data ---
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImuData {
    /// Device timestamp (milliseconds since device boot)
    pub timestamp_ms: Option<u32>,
    /// Acceleration including gravity (m/s²)
    pub accelerometer: Option<Vector3>,
    /// Angular velocity (rad/s)
    pub gyroscope: Option<Vector3>,
}

// --- Standard Error Type ---
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImuError {
    /// Error originating from the underlying device (not found, permission denied)
    #[error("Device error: {0}")]
    DeviceError(String),
    /// Error reading data from the device
    #[error("Read error: {0}")]
    ReadError(String),
    /// Error writing commands to the device
    #[error("Write error: {0}")]
    WriteError(String),
    /// Error during device configuration or setup
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    /// Error sending a command to the reader thread
    #[error("Command send error: {0}")]
    CommandSendError(String),
    /// The device went away or the connection was closed
    #[error("Device disconnected: {0}")]
    Disconnected(String),
}

pub trait ImuReader {
    /// Retrieves the newest IMU sample, or `None` if nothing new arrived since
    /// the previous call.
    fn get_data(&self) -> Result<Option<ImuData>, ImuError>;

    fn stop(&self) -> Result<(), ImuError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ImuError::Disconnected("/dev/ttyACM0".to_string());
        assert_eq!(err.to_string(), "Device disconnected: /dev/ttyACM0");
    }
}

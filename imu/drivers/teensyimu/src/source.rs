use imu_traits::ImuError;
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::info;

use crate::config::DriverConfig;

/// Read timeout of the serial port. Bounds how long a stop request waits on
/// a quiet device.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// A raw byte stream the receiver loop pulls from.
pub trait ByteSource: Send {
    /// Reads up to `buf.len()` bytes.
    ///
    /// Blocks until data arrives or the source's poll interval passes;
    /// `Ok(0)` means nothing arrived yet. A closed or failed source returns
    /// an error.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ImuError>;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ImuError>;

    /// Releases the underlying handle. Later reads fail with `Disconnected`.
    fn close(&mut self);
}

pub struct SerialSource {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl SerialSource {
    pub fn open(config: &DriverConfig) -> Result<Self, ImuError> {
        config.validate()?;
        let port = serialport::new(&config.port, config.baud)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| open_error(&config.port, e))?;

        info!(port = %config.port, baud = config.baud, "opened serial port");
        Ok(Self {
            port: Some(port),
            name: config.port.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, ImuError> {
        self.port
            .as_mut()
            .ok_or_else(|| ImuError::Disconnected(format!("{} is closed", self.name)))
    }
}

impl ByteSource for SerialSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ImuError> {
        let name = self.name.clone();
        match self.port()?.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {
                Ok(0)
            }
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                Err(ImuError::Disconnected(format!("{}: {}", name, e)))
            }
            Err(e) => Err(ImuError::ReadError(format!("{}: {}", name, e))),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ImuError> {
        let name = self.name.clone();
        let port = self.port()?;
        port.write_all(bytes)
            .and_then(|_| port.flush())
            .map_err(|e| ImuError::WriteError(format!("{}: {}", name, e)))
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!(port = %self.name, "closed serial port");
        }
    }
}

impl Drop for SerialSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_error(port: &str, err: serialport::Error) -> ImuError {
    match err.kind() {
        serialport::ErrorKind::InvalidInput => {
            ImuError::ConfigurationError(format!("{}: {}", port, err))
        }
        serialport::ErrorKind::NoDevice => {
            ImuError::DeviceError(format!("{}: device not found ({})", port, err))
        }
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
            ImuError::DeviceError(format!("{}: device not found", port))
        }
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            ImuError::DeviceError(format!("{}: permission denied", port))
        }
        _ => ImuError::DeviceError(format!("{}: {}", port, err)),
    }
}

/// Names of the serial ports currently present on the system.
pub fn list_ports() -> Result<Vec<String>, ImuError> {
    let ports = serialport::available_ports()
        .map_err(|e| ImuError::DeviceError(format!("failed to enumerate ports: {}", e)))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

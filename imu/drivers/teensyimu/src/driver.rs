use imu_traits::{ImuData, ImuError, ImuReader};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::config::DriverConfig;
use crate::message::{ImuMsg, Message};
use crate::protocol::MessageType;
use crate::receiver::{DeviceCommand, ReceiverLoop, ReceiverStatus, SampleSlot, StopHandle};
use crate::registry::CallbackRegistry;
use crate::source::{ByteSource, SerialSource};

/// A Teensy IMU streaming on a background receiver thread.
pub struct TeensyImu {
    registry: Arc<CallbackRegistry>,
    stop: StopHandle,
    command_tx: mpsc::Sender<DeviceCommand>,
    status: Arc<StatusCell>,
    latest: SampleSlot,
    handle: Option<JoinHandle<()>>,
}

/// Final receiver status, written once by the receiver thread.
#[derive(Default)]
struct StatusCell {
    status: Mutex<Option<ReceiverStatus>>,
    ended: Condvar,
}

impl StatusCell {
    // The first status wins.
    fn set(&self, status: ReceiverStatus) {
        let mut slot = self.status.lock();
        if slot.is_none() {
            *slot = Some(status);
        }
        self.ended.notify_all();
    }

    fn get(&self) -> Option<ReceiverStatus> {
        self.status.lock().clone()
    }

    fn wait_until(&self, deadline: Option<Instant>) -> Option<ReceiverStatus> {
        let mut slot = self.status.lock();
        while slot.is_none() {
            match deadline {
                Some(deadline) => {
                    if self.ended.wait_until(&mut slot, deadline).timed_out() {
                        break;
                    }
                }
                None => self.ended.wait(&mut slot),
            }
        }
        slot.clone()
    }
}

impl TeensyImu {
    /// Opens the serial port and starts receiving.
    ///
    /// Configuration and device errors are returned here, before any data is
    /// read.
    pub fn open(config: &DriverConfig) -> Result<Self, ImuError> {
        let source = SerialSource::open(config)?;
        Self::with_source(source)
    }

    /// Starts receiving from an already opened source.
    pub fn with_source<S: ByteSource + 'static>(source: S) -> Result<Self, ImuError> {
        let registry = Arc::new(CallbackRegistry::new());
        let latest = SampleSlot::default();
        let status = Arc::new(StatusCell::default());
        let (command_tx, command_rx) = mpsc::channel();

        let receiver = ReceiverLoop::new(source, Arc::clone(&registry))
            .with_commands(command_rx)
            .with_sample_slot(Arc::clone(&latest));
        let stop = receiver.stop_handle();

        let thread_status = Arc::clone(&status);
        let handle = thread::Builder::new()
            .name("teensyimu-rx".to_string())
            .spawn(move || {
                let ended = match panic::catch_unwind(AssertUnwindSafe(|| receiver.run())) {
                    Ok(Ok(())) => ReceiverStatus::Stopped,
                    Ok(Err(e)) => ReceiverStatus::Failed(e),
                    Err(_) => {
                        error!("callback panicked, receiver terminated");
                        ReceiverStatus::Failed(panicked_error())
                    }
                };
                thread_status.set(ended);
            })
            .map_err(|e| ImuError::DeviceError(format!("failed to spawn receiver: {}", e)))?;

        Ok(Self {
            registry,
            stop,
            command_tx,
            status,
            latest,
            handle: Some(handle),
        })
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    pub fn register<F>(&self, msg_type: MessageType, callback: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.registry.register(msg_type, callback);
    }

    pub fn register_imu<F>(&self, callback: F)
    where
        F: Fn(&ImuMsg) + Send + Sync + 'static,
    {
        self.registry.register_imu(callback);
    }

    /// Asks the device to sample at `frequency_hz`.
    pub fn set_rate(&self, frequency_hz: u16) -> Result<(), ImuError> {
        if frequency_hz == 0 {
            return Err(ImuError::ConfigurationError(
                "sample rate must be positive".to_string(),
            ));
        }
        self.command_tx
            .send(DeviceCommand::SetRate(frequency_hz))
            .map_err(|e| ImuError::CommandSendError(format!("receiver is gone: {}", e)))
    }

    /// Returns the final status if the receiver has ended. Never blocks.
    pub fn try_status(&self) -> Option<ReceiverStatus> {
        self.status.get()
    }

    /// Blocks until the receiver ends.
    pub fn wait(&self) -> ReceiverStatus {
        self.status
            .wait_until(None)
            .unwrap_or_else(|| ReceiverStatus::Failed(panicked_error()))
    }

    /// Like [`TeensyImu::wait`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ReceiverStatus> {
        self.status.wait_until(Some(Instant::now() + timeout))
    }

    /// Stops the receiver and waits for its thread to exit.
    pub fn shutdown(mut self) -> Result<(), ImuError> {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                self.status.set(ReceiverStatus::Failed(panicked_error()));
            }
        }
        info!("teensyimu shut down");
        match self.status.get() {
            Some(ReceiverStatus::Failed(e)) => Err(e),
            _ => Ok(()),
        }
    }
}

impl ImuReader for TeensyImu {
    fn get_data(&self) -> Result<Option<ImuData>, ImuError> {
        if let Some(ReceiverStatus::Failed(e)) = self.status.get() {
            return Err(e);
        }
        Ok(self.latest.lock().take())
    }

    fn stop(&self) -> Result<(), ImuError> {
        self.stop.stop();
        Ok(())
    }
}

impl Drop for TeensyImu {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

fn panicked_error() -> ImuError {
    ImuError::DeviceError("receiver thread panicked".to_string())
}

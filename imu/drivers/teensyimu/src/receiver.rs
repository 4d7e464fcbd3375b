use imu_traits::{ImuData, ImuError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use tracing::{debug, error, info, warn};

use crate::decoder::FrameDecoder;
use crate::message::{Message, RateMsg};
use crate::protocol::encode_frame;
use crate::registry::CallbackRegistry;
use crate::source::ByteSource;

/// Bytes requested from the source per read.
pub const READ_CHUNK_SIZE: usize = 1024;

/// Newest IMU sample, taken by polling readers.
pub type SampleSlot = Arc<Mutex<Option<ImuData>>>;

/// Host-to-device requests applied between read cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    SetRate(u16),
}

/// How a receiver loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiverStatus {
    Stopped,
    Failed(ImuError),
}

impl ReceiverStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, ReceiverStatus::Failed(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Reads from a byte source, decodes frames and hands every message to the
/// registered callback on the calling thread.
pub struct ReceiverLoop<S: ByteSource> {
    source: S,
    decoder: FrameDecoder,
    registry: Arc<CallbackRegistry>,
    stop: StopHandle,
    commands: Option<mpsc::Receiver<DeviceCommand>>,
    latest: Option<SampleSlot>,
    last_t_ms: Option<u32>,
}

impl<S: ByteSource> ReceiverLoop<S> {
    pub fn new(source: S, registry: Arc<CallbackRegistry>) -> Self {
        Self {
            source,
            decoder: FrameDecoder::new(),
            registry,
            stop: StopHandle::default(),
            commands: None,
            latest: None,
            last_t_ms: None,
        }
    }

    pub fn with_decoder(mut self, decoder: FrameDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_commands(mut self, commands: mpsc::Receiver<DeviceCommand>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn with_sample_slot(mut self, slot: SampleSlot) -> Self {
        self.latest = Some(slot);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Runs until stopped (`Ok`) or until the source fails (`Err`).
    ///
    /// The source is closed before returning either way.
    pub fn run(mut self) -> Result<(), ImuError> {
        info!("receiver started");
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let result = self.pump(&mut buf);
        self.source.close();

        debug!(stats = ?self.decoder.stats(), "decoder totals");
        match &result {
            Ok(()) => info!("receiver stopped"),
            Err(e) => error!(error = %e, "receiver terminated"),
        }
        result
    }

    fn pump(&mut self, buf: &mut [u8]) -> Result<(), ImuError> {
        while !self.stop.is_stopped() {
            self.apply_commands()?;

            let n = self.source.read(buf)?;
            if n == 0 {
                continue;
            }

            let Self {
                decoder,
                registry,
                latest,
                last_t_ms,
                ..
            } = self;
            for message in decoder.feed(&buf[..n]) {
                if let Message::Imu(imu) = &message {
                    track_timestamp(last_t_ms, imu.t_ms);
                    if let Some(slot) = latest {
                        *slot.lock() = Some((*imu).into());
                    }
                }
                registry.dispatch(&message);
            }
        }
        Ok(())
    }

    fn apply_commands(&mut self) -> Result<(), ImuError> {
        let Some(commands) = &self.commands else {
            return Ok(());
        };
        while let Ok(command) = commands.try_recv() {
            match command {
                DeviceCommand::SetRate(frequency_hz) => {
                    debug!(frequency_hz, "sending rate command");
                    let frame = encode_frame(&Message::Rate(RateMsg { frequency_hz }));
                    self.source.write_all(&frame)?;
                }
            }
        }
        Ok(())
    }
}

// Device timestamps restart from zero when the board resets.
fn track_timestamp(last_t_ms: &mut Option<u32>, t_ms: u32) {
    if let Some(previous_ms) = *last_t_ms {
        if t_ms < previous_ms {
            warn!(previous_ms, t_ms, "device timestamp went backwards, assuming device reset");
        }
    }
    *last_t_ms = Some(t_ms);
}

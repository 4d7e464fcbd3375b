pub mod config;
pub mod decoder;
pub mod driver;
pub mod message;
pub mod protocol;
pub mod receiver;
pub mod registry;
pub mod source;

pub use config::DriverConfig;
pub use decoder::{DecoderState, DecoderStats, FrameDecoder, Messages};
pub use driver::TeensyImu;
pub use imu_traits::{ImuData, ImuError, ImuReader, Vector3};
pub use message::{ImuMsg, Message, RateMsg};
pub use protocol::{encode_frame, FrameHeader, MessageType, ProtocolError};
pub use receiver::{DeviceCommand, ReceiverLoop, ReceiverStatus, StopHandle};
pub use registry::{Callback, CallbackRegistry};
pub use source::{list_ports, ByteSource, SerialSource};

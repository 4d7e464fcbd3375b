//! Wire format of the Teensy IMU serial link.
//!
//! Frame format (multi-byte fields little-endian):
//! - SYNC (2 bytes): `0xA5 0x5A`
//! - TYPE (1 byte): message type identifier
//! - LENGTH (2 bytes): payload length
//! - PAYLOAD (LENGTH bytes): type-specific data
//! - CHECKSUM (2 bytes): CRC-16/CCITT-FALSE over SYNC, TYPE, LENGTH and PAYLOAD

use byteorder::{ByteOrder, LittleEndian};
use crc::{Crc, CRC_16_IBM_3740};
use strum_macros::{Display, EnumIter, FromRepr};
use thiserror::Error;

use crate::message::Message;

/// Frame synchronization marker
pub const SYNC: [u8; 2] = [0xA5, 0x5A];

/// SYNC + TYPE + LENGTH
pub const HEADER_SIZE: usize = 5;

/// Trailing CRC size in bytes
pub const CHECKSUM_SIZE: usize = 2;

/// Default upper bound on the payload length a header may declare
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 256;

// CRC-16/IBM-3740 is the catalogue name for CCITT-FALSE (poly 0x1021, init 0xFFFF).
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[repr(u8)]
pub enum MessageType {
    /// Accelerometer + gyroscope sample, device -> host
    #[strum(serialize = "imu")]
    Imu = 0x01,
    /// IMU sample rate command, host -> device
    #[strum(serialize = "rate")]
    Rate = 0x02,
}

impl MessageType {
    /// Fixed payload size carried by frames of this type.
    pub fn payload_len(&self) -> usize {
        match self {
            MessageType::Imu => 28,
            MessageType::Rate => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("payload of {len} bytes exceeds maximum {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),
    #[error("{msg_type} payload must be {expected} bytes, got {actual}")]
    LengthMismatch {
        msg_type: MessageType,
        expected: usize,
        actual: usize,
    },
}

/// Header fields following the sync marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: u8,
    pub payload_len: u16,
}

impl FrameHeader {
    /// Reads the header from the start of `bytes`.
    ///
    /// The caller guarantees `bytes` starts with the sync marker and holds at
    /// least [`HEADER_SIZE`] bytes.
    pub fn parse(bytes: &[u8]) -> Self {
        FrameHeader {
            msg_type: bytes[2],
            payload_len: LittleEndian::read_u16(&bytes[3..5]),
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [SYNC[0], SYNC[1], self.msg_type, 0, 0];
        LittleEndian::write_u16(&mut out[3..5], self.payload_len);
        out
    }

    /// Checks that the header could describe a real frame.
    ///
    /// A header that fails here came from a sync pattern that happened to
    /// appear inside other data.
    pub fn validate(&self, max_payload: usize) -> Result<MessageType, ProtocolError> {
        let len = self.payload_len as usize;
        if len > max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                len,
                max: max_payload,
            });
        }
        let msg_type = MessageType::from_repr(self.msg_type)
            .ok_or(ProtocolError::UnknownMessageType(self.msg_type))?;
        if len != msg_type.payload_len() {
            return Err(ProtocolError::LengthMismatch {
                msg_type,
                expected: msg_type.payload_len(),
                actual: len,
            });
        }
        Ok(msg_type)
    }

    /// Total size of the frame this header introduces, checksum included.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_len as usize + CHECKSUM_SIZE
    }
}

pub fn checksum(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

/// Checks the trailing CRC of a complete frame.
pub fn verify_frame(frame: &[u8]) -> bool {
    if frame.len() < HEADER_SIZE + CHECKSUM_SIZE {
        return false;
    }
    let (body, crc) = frame.split_at(frame.len() - CHECKSUM_SIZE);
    checksum(body) == LittleEndian::read_u16(crc)
}

/// Builds a frame around an arbitrary payload.
pub fn encode_raw(msg_type: u8, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let payload_len = u16::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge {
        len: payload.len(),
        max: u16::MAX as usize,
    })?;
    let header = FrameHeader {
        msg_type,
        payload_len,
    };

    let mut frame = Vec::with_capacity(header.frame_len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(payload);
    push_checksum(&mut frame);
    Ok(frame)
}

/// Encodes a message into a complete frame.
pub fn encode_frame(message: &Message) -> Vec<u8> {
    let header = FrameHeader {
        msg_type: message.message_type() as u8,
        payload_len: message.message_type().payload_len() as u16,
    };
    let mut frame = Vec::with_capacity(header.frame_len());
    frame.extend_from_slice(&header.encode());
    message.write_payload(&mut frame);
    push_checksum(&mut frame);
    frame
}

fn push_checksum(frame: &mut Vec<u8>) {
    let mut crc_bytes = [0u8; CHECKSUM_SIZE];
    LittleEndian::write_u16(&mut crc_bytes, checksum(frame));
    frame.extend_from_slice(&crc_bytes);
}

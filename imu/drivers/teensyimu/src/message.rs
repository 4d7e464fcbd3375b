use byteorder::{ByteOrder, LittleEndian};
use imu_traits::{ImuData, Vector3};

use crate::protocol::{MessageType, ProtocolError};

/// One accelerometer + gyroscope sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImuMsg {
    /// Milliseconds since device boot
    pub t_ms: u32,
    /// Acceleration including gravity (m/s²)
    pub accel: Vector3,
    /// Angular rate (rad/s)
    pub gyro: Vector3,
}

/// Requested IMU sample rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateMsg {
    pub frequency_hz: u16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Message {
    Imu(ImuMsg),
    Rate(RateMsg),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Imu(_) => MessageType::Imu,
            Message::Rate(_) => MessageType::Rate,
        }
    }

    /// Decodes a checksum-verified payload.
    pub fn decode(msg_type: MessageType, payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != msg_type.payload_len() {
            return Err(ProtocolError::LengthMismatch {
                msg_type,
                expected: msg_type.payload_len(),
                actual: payload.len(),
            });
        }

        Ok(match msg_type {
            MessageType::Imu => Message::Imu(ImuMsg {
                t_ms: LittleEndian::read_u32(&payload[0..4]),
                accel: read_vector3(&payload[4..16]),
                gyro: read_vector3(&payload[16..28]),
            }),
            MessageType::Rate => Message::Rate(RateMsg {
                frequency_hz: LittleEndian::read_u16(&payload[0..2]),
            }),
        })
    }

    pub(crate) fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            Message::Imu(imu) => {
                let mut payload = [0u8; 28];
                LittleEndian::write_u32(&mut payload[0..4], imu.t_ms);
                write_vector3(&mut payload[4..16], &imu.accel);
                write_vector3(&mut payload[16..28], &imu.gyro);
                out.extend_from_slice(&payload);
            }
            Message::Rate(rate) => {
                let mut payload = [0u8; 2];
                LittleEndian::write_u16(&mut payload, rate.frequency_hz);
                out.extend_from_slice(&payload);
            }
        }
    }
}

impl From<ImuMsg> for ImuData {
    fn from(msg: ImuMsg) -> Self {
        ImuData {
            timestamp_ms: Some(msg.t_ms),
            accelerometer: Some(msg.accel),
            gyroscope: Some(msg.gyro),
        }
    }
}

fn read_vector3(bytes: &[u8]) -> Vector3 {
    Vector3 {
        x: LittleEndian::read_f32(&bytes[0..4]),
        y: LittleEndian::read_f32(&bytes[4..8]),
        z: LittleEndian::read_f32(&bytes[8..12]),
    }
}

fn write_vector3(out: &mut [u8], v: &Vector3) {
    LittleEndian::write_f32(&mut out[0..4], v.x);
    LittleEndian::write_f32(&mut out[4..8], v.y);
    LittleEndian::write_f32(&mut out[8..12], v.z);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imu_payload_layout() {
        let msg = Message::Imu(ImuMsg {
            t_ms: 1000,
            accel: Vector3::new(0.0, 0.0, 9.81),
            gyro: Vector3::default(),
        });
        let mut payload = Vec::new();
        msg.write_payload(&mut payload);

        assert_eq!(payload.len(), 28);
        assert_eq!(&payload[0..4], &1000u32.to_le_bytes());
        assert_eq!(&payload[12..16], &9.81f32.to_le_bytes());
        assert!(payload[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_payload_appends_after_existing_bytes() {
        let mut out = vec![0xAA];
        Message::Rate(RateMsg { frequency_hz: 0x0102 }).write_payload(&mut out);
        assert_eq!(out, vec![0xAA, 0x02, 0x01]);

        let mut out = vec![0xAA];
        Message::Imu(ImuMsg::default()).write_payload(&mut out);
        assert_eq!(out.len(), 1 + MessageType::Imu.payload_len());
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let result = Message::decode(MessageType::Rate, &[1, 2, 3]);
        assert!(matches!(
            result,
            Err(ProtocolError::LengthMismatch { expected: 2, actual: 3, .. })
        ));
    }

    #[test]
    fn test_imu_into_imu_data() {
        let msg = ImuMsg {
            t_ms: 42,
            accel: Vector3::new(1.0, 2.0, 3.0),
            gyro: Vector3::new(-0.5, 0.0, 0.5),
        };
        let data: ImuData = msg.into();
        assert_eq!(data.timestamp_ms, Some(42));
        assert_eq!(data.accelerometer, Some(Vector3::new(1.0, 2.0, 3.0)));
        assert_eq!(data.gyroscope, Some(Vector3::new(-0.5, 0.0, 0.5)));
    }
}

//! Incremental frame decoder.
//!
//! Bytes from the serial port arrive in arbitrary chunks. The decoder keeps
//! them in a single `BytesMut` buffer and walks a small state machine:
//! - `SeekingSync`: scan for the sync marker, dropping everything before it
//! - `ReadingHeader`: need [`HEADER_SIZE`] bytes to read type and length
//! - `ReadingPayload`: need the declared payload plus the checksum
//! - `Validating`: check the CRC and decode the payload
//!
//! A header that does not make sense, or a frame whose CRC does not match,
//! costs exactly one byte: the first sync byte is dropped and scanning
//! resumes right after it, so a corrupted frame never takes the following
//! frames down with it.

use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

use crate::message::Message;
use crate::protocol::{
    self, FrameHeader, MessageType, CHECKSUM_SIZE, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, SYNC,
};

/// Default bound on bytes carried over between `feed` calls.
pub const DEFAULT_MAX_BUFFERED: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    SeekingSync,
    ReadingHeader,
    ReadingPayload {
        header: FrameHeader,
        msg_type: MessageType,
    },
    Validating {
        header: FrameHeader,
        msg_type: MessageType,
    },
}

/// Counters describing what the decoder has seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub checksum_failures: u64,
    pub false_syncs: u64,
    /// Bytes dropped while scanning for sync or recovering from a bad frame.
    pub bytes_discarded: u64,
    /// Bytes dropped because the buffer bound was exceeded.
    pub overflow_drops: u64,
}

pub struct FrameDecoder {
    buffer: BytesMut,
    state: DecoderState,
    max_payload: usize,
    max_buffered: usize,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_MAX_BUFFERED)
    }

    /// Creates a decoder with a custom payload bound and buffer bound.
    ///
    /// The buffer bound is raised to at least one maximum-size frame.
    pub fn with_limits(max_payload: usize, max_buffered: usize) -> Self {
        let max_buffered = max_buffered.max(HEADER_SIZE + max_payload + CHECKSUM_SIZE);
        Self {
            buffer: BytesMut::with_capacity(max_buffered),
            state: DecoderState::SeekingSync,
            max_payload,
            max_buffered,
            stats: DecoderStats::default(),
        }
    }

    /// Appends `bytes` and returns an iterator over the messages they complete.
    ///
    /// Frames are extracted lazily as the iterator is advanced. Anything left
    /// unread when the iterator is dropped stays buffered for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Messages<'_> {
        if self.buffer.len() > self.max_buffered {
            let excess = self.buffer.len() - self.max_buffered;
            warn!(
                excess,
                buffered = self.buffer.len(),
                "decoder buffer over limit, dropping oldest bytes"
            );
            self.buffer.advance(excess);
            self.stats.overflow_drops += excess as u64;
            self.state = DecoderState::SeekingSync;
        }
        self.buffer.extend_from_slice(bytes);
        Messages { decoder: self }
    }

    /// Extracts the next complete, valid message from buffered bytes.
    ///
    /// Returns `None` when more bytes are needed.
    pub fn next_message(&mut self) -> Option<Message> {
        loop {
            match self.state {
                DecoderState::SeekingSync => {
                    if !self.seek_sync() {
                        return None;
                    }
                    self.state = DecoderState::ReadingHeader;
                }
                DecoderState::ReadingHeader => {
                    if self.buffer.len() < HEADER_SIZE {
                        return None;
                    }
                    let header = FrameHeader::parse(&self.buffer[..HEADER_SIZE]);
                    match header.validate(self.max_payload) {
                        Ok(msg_type) => {
                            self.state = DecoderState::ReadingPayload { header, msg_type };
                        }
                        Err(e) => {
                            trace!(error = %e, "false sync match");
                            self.stats.false_syncs += 1;
                            self.discard(1);
                            self.state = DecoderState::SeekingSync;
                        }
                    }
                }
                DecoderState::ReadingPayload { header, msg_type } => {
                    if self.buffer.len() < header.frame_len() {
                        return None;
                    }
                    self.state = DecoderState::Validating { header, msg_type };
                }
                DecoderState::Validating { header, msg_type } => {
                    let frame_len = header.frame_len();
                    self.state = DecoderState::SeekingSync;

                    if !protocol::verify_frame(&self.buffer[..frame_len]) {
                        trace!(%msg_type, "checksum mismatch");
                        self.stats.checksum_failures += 1;
                        self.discard(1);
                        continue;
                    }

                    let decoded = Message::decode(
                        msg_type,
                        &self.buffer[HEADER_SIZE..frame_len - CHECKSUM_SIZE],
                    );
                    self.buffer.advance(frame_len);
                    match decoded {
                        Ok(message) => {
                            self.stats.frames_decoded += 1;
                            return Some(message);
                        }
                        Err(e) => trace!(error = %e, "dropping undecodable frame"),
                    }
                }
            }
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn stats(&self) -> &DecoderStats {
        &self.stats
    }

    /// Number of bytes currently held.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops buffered bytes and returns to `SeekingSync`. Stats are kept.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = DecoderState::SeekingSync;
    }

    // Leaves the buffer starting at a sync marker and returns true, or drops
    // everything that cannot start one and returns false.
    fn seek_sync(&mut self) -> bool {
        let found = self
            .buffer
            .windows(SYNC.len())
            .position(|w| w == &SYNC[..]);
        if let Some(offset) = found {
            if offset > 0 {
                trace!(skipped = offset, "resynchronized");
                self.discard(offset);
            }
            return true;
        }

        // A trailing first sync byte may be completed by the next read.
        let keep = usize::from(self.buffer.last() == Some(&SYNC[0]));
        let drop = self.buffer.len() - keep;
        self.discard(drop);
        false
    }

    fn discard(&mut self, n: usize) {
        self.buffer.advance(n);
        self.stats.bytes_discarded += n as u64;
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy sequence of messages produced by [`FrameDecoder::feed`].
pub struct Messages<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Messages<'_> {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        self.decoder.next_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ImuMsg, RateMsg};
    use crate::protocol::{encode_frame, encode_raw};
    use imu_traits::Vector3;

    fn imu(t_ms: u32, accel_z: f32) -> Message {
        Message::Imu(ImuMsg {
            t_ms,
            accel: Vector3::new(0.0, 0.0, accel_z),
            gyro: Vector3::new(0.25, -0.5, 1.0),
        })
    }

    fn concat(messages: &[Message]) -> Vec<u8> {
        messages.iter().flat_map(encode_frame).collect()
    }

    #[test]
    fn test_single_imu_frame() {
        let mut decoder = FrameDecoder::new();
        let frame = encode_frame(&Message::Imu(ImuMsg {
            t_ms: 1000,
            accel: Vector3::new(0.0, 0.0, 9.81),
            gyro: Vector3::default(),
        }));
        assert_eq!(frame.len(), 35);

        let messages: Vec<_> = decoder.feed(&frame).collect();

        assert_eq!(messages.len(), 1);
        match messages[0] {
            Message::Imu(msg) => {
                assert_eq!(msg.t_ms, 1000);
                assert_eq!(msg.accel.z, 9.81);
                assert_eq!(msg.gyro, Vector3::default());
            }
            other => panic!("unexpected message {:?}", other),
        }
        assert_eq!(decoder.state(), DecoderState::SeekingSync);
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.stats().frames_decoded, 1);
    }

    #[test]
    fn test_flipped_checksum() {
        let mut decoder = FrameDecoder::new();
        let mut frame = encode_frame(&imu(1000, 9.81));
        let n = frame.len();
        frame[n - 2] ^= 0xFF;
        frame[n - 1] ^= 0xFF;

        assert_eq!(decoder.feed(&frame).count(), 0);
        assert_eq!(decoder.state(), DecoderState::SeekingSync);
        assert_eq!(decoder.stats().checksum_failures, 1);
        assert_eq!(decoder.stats().false_syncs, 0);

        // Nothing of the bad frame lingers in front of the next one.
        let good = encode_frame(&imu(1010, 9.81));
        let messages: Vec<_> = decoder.feed(&good).collect();
        assert_eq!(messages, vec![imu(1010, 9.81)]);
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut decoder = FrameDecoder::new();
        let expected: Vec<_> = (0..10).map(|i| imu(i * 5, i as f32)).collect();

        let messages: Vec<_> = decoder.feed(&concat(&expected)).collect();

        assert_eq!(messages, expected);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_fragmented_header() {
        let mut decoder = FrameDecoder::new();
        let frame = encode_frame(&imu(1, 1.0));

        assert_eq!(decoder.feed(&frame[..3]).count(), 0);
        assert_eq!(decoder.state(), DecoderState::ReadingHeader);
        assert_eq!(decoder.buffered(), 3);

        let messages: Vec<_> = decoder.feed(&frame[3..]).collect();
        assert_eq!(messages, vec![imu(1, 1.0)]);
    }

    #[test]
    fn test_fragmented_payload() {
        let mut decoder = FrameDecoder::new();
        let frame = encode_frame(&imu(2, 2.0));

        assert_eq!(decoder.feed(&frame[..20]).count(), 0);
        assert!(matches!(
            decoder.state(),
            DecoderState::ReadingPayload {
                msg_type: MessageType::Imu,
                ..
            }
        ));

        let messages: Vec<_> = decoder.feed(&frame[20..]).collect();
        assert_eq!(messages, vec![imu(2, 2.0)]);
    }

    #[test]
    fn test_truncated_frame_never_emits() {
        let frame = encode_frame(&imu(3, 3.0));
        for cut in 0..frame.len() {
            let mut decoder = FrameDecoder::new();
            assert_eq!(decoder.feed(&frame[..cut]).count(), 0, "cut at {}", cut);
        }
    }

    #[test]
    fn test_sync_split_across_reads() {
        let mut decoder = FrameDecoder::new();
        let frame = encode_frame(&imu(4, 4.0));
        let mut first = vec![0x00, 0x13, 0x37];
        first.push(frame[0]);

        assert_eq!(decoder.feed(&first).count(), 0);
        assert_eq!(decoder.buffered(), 1);
        assert_eq!(decoder.state(), DecoderState::SeekingSync);

        let messages: Vec<_> = decoder.feed(&frame[1..]).collect();
        assert_eq!(messages, vec![imu(4, 4.0)]);
        assert_eq!(decoder.stats().bytes_discarded, 3);
    }

    #[test]
    fn test_garbage_before_frame() {
        let mut decoder = FrameDecoder::new();
        let mut data = vec![0xFF, 0x00, 0x5A, 0xA5, 0x12];
        data.extend(encode_frame(&Message::Rate(RateMsg { frequency_hz: 200 })));

        let messages: Vec<_> = decoder.feed(&data).collect();

        assert_eq!(messages, vec![Message::Rate(RateMsg { frequency_hz: 200 })]);
        assert_eq!(decoder.stats().bytes_discarded, 5);
    }

    #[test]
    fn test_oversize_length_is_false_sync() {
        let mut decoder = FrameDecoder::new();
        let mut data = vec![0xA5, 0x5A, 0x01, 0xFF, 0xFF];
        data.extend(encode_frame(&imu(5, 5.0)));

        let messages: Vec<_> = decoder.feed(&data).collect();

        assert_eq!(messages, vec![imu(5, 5.0)]);
        assert_eq!(decoder.stats().false_syncs, 1);
    }

    #[test]
    fn test_unknown_type_is_false_sync() {
        let mut decoder = FrameDecoder::new();
        let mut data = encode_raw(0x42, &[1, 2, 3, 4]).unwrap();
        data.extend(encode_frame(&imu(6, 6.0)));

        let messages: Vec<_> = decoder.feed(&data).collect();

        assert_eq!(messages, vec![imu(6, 6.0)]);
        assert_eq!(decoder.stats().false_syncs, 1);
    }

    #[test]
    fn test_single_corrupted_byte_drops_one_frame() {
        let originals: Vec<_> = (0..5).map(|i| imu(100 + i, 1.5 * i as f32)).collect();
        let clean = concat(&originals);
        let frame_len = encode_frame(&originals[0]).len();
        let start = 2 * frame_len;

        for offset in 0..frame_len {
            let mut data = clean.clone();
            data[start + offset] ^= 0xFF;

            let mut decoder = FrameDecoder::new();
            let messages: Vec<_> = decoder.feed(&data).collect();

            let expected: Vec<_> = originals
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != 2)
                .map(|(_, m)| *m)
                .collect();
            assert_eq!(messages, expected, "corrupted byte at offset {}", offset);
        }
    }

    #[test]
    fn test_lazy_iterator_keeps_unread_frames() {
        let mut decoder = FrameDecoder::new();
        let expected: Vec<_> = (0..3).map(|i| imu(i, 0.5)).collect();

        let first = decoder.feed(&concat(&expected)).next();
        assert_eq!(first, Some(expected[0]));

        let rest: Vec<_> = decoder.feed(&[]).collect();
        assert_eq!(rest, expected[1..].to_vec());
    }

    #[test]
    fn test_buffer_bound_drops_oldest() {
        let mut decoder = FrameDecoder::with_limits(DEFAULT_MAX_PAYLOAD_SIZE, 300);

        // Iterator dropped unread: the zeros stay buffered.
        drop(decoder.feed(&[0u8; 400]));
        assert_eq!(decoder.buffered(), 400);

        let messages: Vec<_> = decoder.feed(&encode_frame(&imu(7, 7.0))).collect();

        assert_eq!(messages, vec![imu(7, 7.0)]);
        assert_eq!(decoder.stats().overflow_drops, 100);
        // The remaining 300 zeros were dropped while scanning, not by the bound.
        assert_eq!(decoder.stats().bytes_discarded, 300);
    }

    #[test]
    fn test_buffer_bound_covers_one_frame() {
        let decoder = FrameDecoder::with_limits(64, 8);
        assert_eq!(decoder.max_buffered, HEADER_SIZE + 64 + CHECKSUM_SIZE);
    }

    #[test]
    fn test_reset_clears_partial_frame() {
        let mut decoder = FrameDecoder::new();
        let frame = encode_frame(&imu(8, 8.0));

        assert_eq!(decoder.feed(&frame[..10]).count(), 0);
        decoder.reset();
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.state(), DecoderState::SeekingSync);

        // The tail of the old frame alone is garbage.
        assert_eq!(decoder.feed(&frame[10..]).count(), 0);
        let messages: Vec<_> = decoder.feed(&frame).collect();
        assert_eq!(messages, vec![imu(8, 8.0)]);
    }
}

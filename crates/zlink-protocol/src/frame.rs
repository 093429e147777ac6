//! Frame encoding/decoding utilities.
//!
//! Commands travel inside SLIP-style frames. A single delimiter byte opens and
//! closes each frame, in-payload delimiter and escape bytes are substituted by
//! two-byte sequences, and a two's-complement 16-bit sum of the unescaped
//! payload is appended as a little-endian trailer:
//!
//! ```text
//! +------+---------------------+--------+--------+------+
//! | 0xC0 | escaped payload ... | crc_lo | crc_hi | 0xC0 |
//! +------+---------------------+--------+--------+------+
//! ```
//!
//! The trailer bytes pass through the same escaping as the payload.

use bytes::BytesMut;

use crate::constants::*;
use crate::error::{EncodeError, ParseError};
use crate::{Command, CommandTable};

/// Compute the frame checksum of `data`: the two's complement of the
/// wrapping 16-bit sum of its bytes.
pub fn checksum(data: &[u8]) -> u16 {
    let sum = data
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)));
    (!sum).wrapping_add(1)
}

#[inline]
fn push_escaped(out: &mut Vec<u8>, byte: u8) {
    match byte {
        FRAME_END => {
            out.push(FRAME_ESC);
            out.push(FRAME_ESC_END);
        }
        FRAME_ESC => {
            out.push(FRAME_ESC);
            out.push(FRAME_ESC_ESC);
        }
        _ => out.push(byte),
    }
}

/// Stateless frame encoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a payload into a complete wire frame.
    pub fn encode(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 8);
        let mut sum = 0u16;

        out.push(FRAME_END);
        for &b in payload {
            sum = sum.wrapping_add(u16::from(b));
            push_escaped(&mut out, b);
        }

        let crc = (!sum).wrapping_add(1);
        push_escaped(&mut out, (crc & 0xFF) as u8);
        push_escaped(&mut out, (crc >> 8) as u8);
        out.push(FRAME_END);
        out
    }
}

/// Counters kept by a [`FrameReceiver`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Frames delivered with a valid checksum.
    pub frames: u64,
    /// Frames discarded because the checksum did not match.
    pub checksum_errors: u64,
    /// Frames discarded because of an invalid escape sequence or a
    /// delimiter received right after an escape marker.
    pub escape_errors: u64,
    /// Bytes dropped because the accumulation buffer was full.
    pub overflow_bytes: u64,
}

/// Incremental frame receiver. One instance per channel.
#[derive(Debug)]
pub struct FrameReceiver {
    /// Unescaped bytes of the frame in progress, trailer included.
    buffer: BytesMut,
    capacity: usize,
    escaped: bool,
    exceeded: bool,
    stats: ReceiverStats,
}

impl Default for FrameReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReceiver {
    /// Create a receiver with the default capacity of [`MAX_FRAME_SIZE`].
    pub fn new() -> Self {
        Self::with_capacity(MAX_FRAME_SIZE)
    }

    /// Create a receiver that accumulates at most `capacity` unescaped bytes
    /// per frame, checksum included.
    pub fn with_capacity(capacity: usize) -> Self {
        FrameReceiver {
            buffer: BytesMut::with_capacity(capacity),
            capacity,
            escaped: false,
            exceeded: false,
            stats: ReceiverStats::default(),
        }
    }

    /// Feed one byte. Returns the payload when the byte completes a frame
    /// whose checksum verifies.
    pub fn feed(&mut self, byte: u8) -> Option<Vec<u8>> {
        match byte {
            FRAME_END if self.escaped => {
                log::trace!("delimiter after escape marker, flushing {} bytes", self.buffer.len());
                self.stats.escape_errors += 1;
                self.reset();
                None
            }
            FRAME_END => self.finish(),
            _ if self.escaped => {
                self.escaped = false;
                match byte {
                    FRAME_ESC_END => self.append(FRAME_END),
                    FRAME_ESC_ESC => self.append(FRAME_ESC),
                    other => {
                        log::trace!("invalid escape sequence 0x{:02X}, dropping frame", other);
                        self.stats.escape_errors += 1;
                        self.reset();
                    }
                }
                None
            }
            FRAME_ESC => {
                self.escaped = true;
                None
            }
            _ => {
                self.append(byte);
                None
            }
        }
    }

    /// Feed a chunk of bytes, returning every payload completed by it.
    pub fn feed_slice(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        data.iter().filter_map(|&b| self.feed(b)).collect()
    }

    /// Whether bytes of the frame in progress were dropped for lack of space.
    pub fn buffer_exceeded(&self) -> bool {
        self.exceeded
    }

    /// Number of unescaped bytes accumulated for the frame in progress.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Receiver counters.
    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    /// Drop the frame in progress.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.escaped = false;
        self.exceeded = false;
    }

    fn append(&mut self, byte: u8) {
        if self.buffer.len() < self.capacity {
            self.buffer.extend_from_slice(&[byte]);
        } else {
            self.exceeded = true;
            self.stats.overflow_bytes += 1;
        }
    }

    fn finish(&mut self) -> Option<Vec<u8>> {
        let len = self.buffer.len();
        if len < FRAME_CRC_SIZE {
            self.reset();
            return None;
        }

        let expected = checksum(&self.buffer[..len - FRAME_CRC_SIZE]);
        let received = u16::from(self.buffer[len - 1]) << 8 | u16::from(self.buffer[len - 2]);

        let result = if expected == received {
            self.stats.frames += 1;
            Some(self.buffer[..len - FRAME_CRC_SIZE].to_vec())
        } else {
            log::debug!(
                "checksum mismatch: expected 0x{:04X}, got 0x{:04X} ({} bytes{})",
                expected,
                received,
                len,
                if self.exceeded { ", buffer exceeded" } else { "" }
            );
            self.stats.checksum_errors += 1;
            None
        };

        self.reset();
        result
    }
}

/// Frames commands for transmission and decodes received frames into
/// commands, using one command table.
pub struct ProtocolSession<'t> {
    table: &'t CommandTable,
    receiver: FrameReceiver,
    decoded: std::collections::VecDeque<Vec<u8>>,
}

impl Default for ProtocolSession<'static> {
    fn default() -> Self {
        Self::new(CommandTable::builtin())
    }
}

impl<'t> ProtocolSession<'t> {
    /// Create a protocol session over `table`.
    pub fn new(table: &'t CommandTable) -> Self {
        ProtocolSession {
            table,
            receiver: FrameReceiver::new(),
            decoded: std::collections::VecDeque::new(),
        }
    }

    /// Create a session whose receiver holds at most `capacity` bytes per frame.
    pub fn with_capacity(table: &'t CommandTable, capacity: usize) -> Self {
        ProtocolSession {
            table,
            receiver: FrameReceiver::with_capacity(capacity),
            decoded: std::collections::VecDeque::new(),
        }
    }

    /// The command table used by this session.
    pub fn table(&self) -> &'t CommandTable {
        self.table
    }

    /// Encode and frame a command for transmission.
    pub fn encode_command(&self, command: &Command) -> Result<Vec<u8>, EncodeError> {
        let payload = self.table.encode(command, MAX_COMMAND_SIZE)?;
        Ok(FrameCodec::encode(&payload))
    }

    /// Feed received data into the frame receiver.
    pub fn feed(&mut self, data: &[u8]) {
        for &b in data {
            if let Some(payload) = self.receiver.feed(b) {
                self.decoded.push_back(payload);
            }
        }
    }

    /// Decode the next complete frame.
    ///
    /// Returns `None` if no frame is waiting, otherwise the decode result of
    /// the oldest frame.
    pub fn try_decode(&mut self) -> Option<Result<Command, ParseError>> {
        self.decoded
            .pop_front()
            .map(|payload| self.table.decode(&payload))
    }

    /// Frame receiver counters.
    pub fn receiver_stats(&self) -> ReceiverStats {
        self.receiver.stats()
    }

    /// Drop buffered data and frames not yet decoded.
    pub fn reset(&mut self) {
        self.receiver.reset();
        self.decoded.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receive_all(receiver: &mut FrameReceiver, data: &[u8]) -> Vec<Vec<u8>> {
        receiver.feed_slice(data)
    }

    #[test]
    fn test_encode_known_frame() {
        // sum = 0x07 + 0x01 = 0x08, crc = 0xFFF8
        let frame = FrameCodec::encode(&[0x07, 0x01]);
        assert_eq!(frame, vec![0xC0, 0x07, 0x01, 0xF8, 0xFF, 0xC0]);
    }

    #[test]
    fn test_checksum_wraps() {
        let data = vec![0xFF; 300];
        let sum = (300u32 * 0xFF) as u16;
        assert_eq!(checksum(&data), (!sum).wrapping_add(1));
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut receiver = FrameReceiver::new();
        let payload: Vec<u8> = (0..=255u8).collect();
        let frames = receive_all(&mut receiver, &FrameCodec::encode(&payload));
        assert_eq!(frames, vec![payload]);
        assert_eq!(receiver.stats().frames, 1);
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let mut receiver = FrameReceiver::new();
        let frames = receive_all(&mut receiver, &FrameCodec::encode(&[]));
        assert_eq!(frames, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_escaping_in_all_positions() {
        let specials = [FRAME_END, FRAME_ESC, FRAME_ESC_END, FRAME_ESC_ESC];
        let mut receiver = FrameReceiver::new();

        for &a in &specials {
            for &b in &specials {
                for payload in [
                    vec![a],
                    vec![a, b],
                    vec![a, 0x11, b],
                    vec![0x22, a, b, 0x33],
                    vec![a, b, a, b],
                ] {
                    let frame = FrameCodec::encode(&payload);
                    // Only the outer delimiters may appear raw.
                    assert_eq!(frame.iter().filter(|&&x| x == FRAME_END).count(), 2);
                    let frames = receive_all(&mut receiver, &frame);
                    assert_eq!(frames, vec![payload.clone()]);
                }
            }
        }
    }

    #[test]
    fn test_escaped_trailer() {
        // Find a payload whose checksum low byte is the delimiter.
        let payload = [0x40u8];
        // crc = 0x10000 - 0x40 = 0xFFC0
        let frame = FrameCodec::encode(&payload);
        assert_eq!(frame, vec![0xC0, 0x40, FRAME_ESC, FRAME_ESC_END, 0xFF, 0xC0]);

        let mut receiver = FrameReceiver::new();
        assert_eq!(receive_all(&mut receiver, &frame), vec![payload.to_vec()]);
    }

    #[test]
    fn test_any_flipped_byte_is_rejected() {
        let payload = [0x0D, 0x05, 0x00, 0x09, 0x00, 0x44, 0x33, 0x22, 0x11];
        let frame = FrameCodec::encode(&payload);

        // Flip every byte between the delimiters that is not an escape marker.
        for i in 1..frame.len() - 1 {
            if frame[i] == FRAME_ESC || frame[i - 1] == FRAME_ESC {
                continue;
            }
            let mut corrupted = frame.clone();
            corrupted[i] ^= 0x01;
            if corrupted[i] == FRAME_END || corrupted[i] == FRAME_ESC {
                continue;
            }
            let mut receiver = FrameReceiver::new();
            assert!(
                receive_all(&mut receiver, &corrupted).is_empty(),
                "flipping byte {} went undetected",
                i
            );
            assert_eq!(receiver.stats().checksum_errors, 1);
        }
    }

    #[test]
    fn test_delimiter_after_escape_flushes() {
        let mut receiver = FrameReceiver::new();
        let frames = receive_all(&mut receiver, &[0xC0, 0x01, 0x02, FRAME_ESC, 0xC0]);
        assert!(frames.is_empty());
        assert_eq!(receiver.buffered_len(), 0);
        assert_eq!(receiver.stats().escape_errors, 1);

        // The receiver recovers on the next frame.
        let frames = receive_all(&mut receiver, &FrameCodec::encode(&[0x07]));
        assert_eq!(frames, vec![vec![0x07]]);
    }

    #[test]
    fn test_invalid_escape_resets_buffer() {
        let mut receiver = FrameReceiver::new();
        // Garbage before the invalid escape must not leak into the next frame.
        let mut data = vec![0xC0, 0x55, 0x66, FRAME_ESC, 0x01, 0x77];
        data.extend_from_slice(&FrameCodec::encode(&[0x0D, 0x01]));
        let frames = receive_all(&mut receiver, &data);
        assert_eq!(frames, vec![vec![0x0D, 0x01]]);
        assert_eq!(receiver.stats().escape_errors, 1);
    }

    #[test]
    fn test_short_frame_ignored() {
        let mut receiver = FrameReceiver::new();
        assert!(receive_all(&mut receiver, &[0xC0, 0x01, 0xC0, 0xC0]).is_empty());
        assert_eq!(receiver.stats(), ReceiverStats::default());
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut receiver = FrameReceiver::new();
        let mut data = FrameCodec::encode(b"first");
        data.extend_from_slice(&FrameCodec::encode(b"second"));
        let frames = receive_all(&mut receiver, &data);
        assert_eq!(frames, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn test_buffer_exceeded_is_reported() {
        let mut receiver = FrameReceiver::with_capacity(8);
        let frame = FrameCodec::encode(&[0x01; 16]);
        // Feed everything but the closing delimiter.
        for &b in &frame[..frame.len() - 1] {
            assert!(receiver.feed(b).is_none());
        }
        assert!(receiver.buffer_exceeded());
        assert_eq!(receiver.buffered_len(), 8);
        assert!(receiver.feed(FRAME_END).is_none());
        assert!(!receiver.buffer_exceeded());
        assert!(receiver.stats().overflow_bytes > 0);
    }

    #[test]
    fn test_session_decodes_commands() {
        let mut session = ProtocolSession::default();
        let cmd = Command::new(CMD_VERSION, vec![crate::Value::U32(0x2670_0700)]).with_seq(9);
        let frame = session.encode_command(&cmd).expect("encodes");

        session.feed(&frame[..3]);
        assert!(session.try_decode().is_none());
        session.feed(&frame[3..]);

        let decoded = session.try_decode().expect("frame ready").expect("decodes");
        assert_eq!(decoded, cmd);
        assert!(session.try_decode().is_none());
    }
}

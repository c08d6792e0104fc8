//! Frame validation and boundary detection for Modbus RTU.

use crate::crc::{crc16_bytes, verify_crc};

/// Shortest possible RTU frame: address + function + CRC.
pub const MIN_FRAME_LEN: usize = 4;

/// Receive accumulator limit before the buffer is declared garbage.
pub const MAX_BUFFER_LEN: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short: minimum 4 bytes required")]
    TooShort { length: usize },

    #[error("CRC mismatch at byte {position}: expected {expected:02X?}, received {received:02X?}")]
    CrcMismatch {
        expected: [u8; 2],
        received: [u8; 2],
        position: usize,
    },

    #[error("receive buffer overflow: more than {MAX_BUFFER_LEN} bytes without a valid frame")]
    BufferOverflow,
}

/// A validated frame split into its wire fields. Borrows the raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedFrame<'a> {
    pub address: u8,
    pub function: u8,
    pub payload: &'a [u8],
}

/// Validate length and CRC, then split out address, function and payload.
pub fn decode(frame: &[u8]) -> Result<ParsedFrame<'_>, FrameError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort { length: frame.len() });
    }

    let crc_start = frame.len() - 2;
    let expected = crc16_bytes(&frame[..crc_start]);
    let received = [frame[crc_start], frame[crc_start + 1]];
    if expected != received {
        return Err(FrameError::CrcMismatch {
            expected,
            received,
            position: crc_start,
        });
    }

    Ok(ParsedFrame {
        address: frame[0],
        function: frame[1],
        payload: &frame[2..crc_start],
    })
}

/// Frame-boundary detector for byte streams without explicit delimiters.
///
/// RTU delimits frames by inter-frame silence, which belongs to the serial
/// channel, not this crate. When the channel cannot observe timing it can
/// accumulate bytes here instead: `next_frame` yields the shortest CRC-valid
/// prefix, which is unambiguous for well-formed Modbus traffic.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes. A buffer that grows past [`MAX_BUFFER_LEN`]
    /// holds no recoverable frame; it is cleared and the overflow reported.
    pub fn extend(&mut self, data: &[u8]) -> Result<(), FrameError> {
        self.buf.extend_from_slice(data);
        if self.buf.len() > MAX_BUFFER_LEN {
            self.buf.clear();
            return Err(FrameError::BufferOverflow);
        }
        Ok(())
    }

    /// Extract the next complete frame, if the accumulated bytes contain one.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        for end in MIN_FRAME_LEN..=self.buf.len() {
            if verify_crc(&self.buf[..end]) {
                let frame = self.buf[..end].to_vec();
                self.buf.drain(..end);
                return Some(frame);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

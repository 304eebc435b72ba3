//! Frame codec for length-prefixed framing.
//!
//! # Frame Format
//!
//! Each frame consists of:
//! - 4 bytes: magic bytes "FDRP"
//! - 4 bytes: payload length (big-endian)
//! - N bytes: payload
//!
//! Handshake messages and encrypted records are both carried as frame
//! payloads. The codec never looks inside the payload.

use crate::error::{ProtocolError, Result};

/// Magic bytes identifying a file-drop frame.
pub const FRAME_MAGIC: [u8; 4] = *b"FDRP";

/// Maximum frame size (16 MB), header included.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame header size: 4 (magic) + 4 (length) = 8 bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// A frame carrying an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The payload data.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame with the given payload.
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }
}

/// Encoder and decoder for frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new frame codec.
    pub fn new() -> Self {
        Self
    }

    /// Encode a frame into bytes.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let payload = &frame.payload;
        let total_size = FRAME_HEADER_SIZE + payload.len();

        if total_size > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: total_size,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut output = Vec::with_capacity(total_size);
        output.extend_from_slice(&FRAME_MAGIC);
        output.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        output.extend_from_slice(payload);

        Ok(output)
    }

    /// Validate a frame header and return the payload length it announces.
    ///
    /// Stream readers use this to learn how many bytes to read next.
    pub fn parse_header(&self, header: &[u8; FRAME_HEADER_SIZE]) -> Result<usize> {
        let magic = [header[0], header[1], header[2], header[3]];
        if magic != FRAME_MAGIC {
            return Err(ProtocolError::InvalidFrameMagic {
                expected: u32::from_be_bytes(FRAME_MAGIC),
                got: u32::from_be_bytes(magic),
            });
        }

        let payload_len =
            u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

        let total_frame_size = FRAME_HEADER_SIZE + payload_len;
        if total_frame_size > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: total_frame_size,
                max: MAX_FRAME_SIZE,
            });
        }

        Ok(payload_len)
    }

    /// Decode a frame from bytes.
    ///
    /// Returns the decoded frame and the number of bytes consumed.
    pub fn decode(&self, data: &[u8]) -> Result<(Frame, usize)> {
        match self.try_decode(data)? {
            Some(decoded) => Ok(decoded),
            None => Err(ProtocolError::Deserialization(format!(
                "insufficient data for frame: have {} bytes",
                data.len()
            ))),
        }
    }

    /// Try to decode a frame from bytes, returning None if there isn't enough data.
    ///
    /// This is useful for streaming scenarios where you may receive partial frames.
    pub fn try_decode(&self, data: &[u8]) -> Result<Option<(Frame, usize)>> {
        let Some(header) = data.get(..FRAME_HEADER_SIZE) else {
            return Ok(None);
        };
        let mut header_bytes = [0u8; FRAME_HEADER_SIZE];
        header_bytes.copy_from_slice(header);

        let payload_len = self.parse_header(&header_bytes)?;
        let end = FRAME_HEADER_SIZE + payload_len;

        match data.get(FRAME_HEADER_SIZE..end) {
            Some(payload) => Ok(Some((Frame::new(payload.to_vec()), end))),
            None => Ok(None),
        }
    }
}

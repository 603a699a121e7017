//! Frame Codec
//!
//! Length-prefixed JSON with a CRC32 checksum, used by the daemon socket.
//!
//! # Frame Format
//!
//! ```text
//! +----------------+----------------+------------------------------------------+
//! | Length (4)     | Checksum (4)   | JSON Payload (variable)                  |
//! | big-endian u32 | CRC32 (BE)     | ClientRequest or ServerFrame             |
//! +----------------+----------------+------------------------------------------+
//! ```
//!
//! Length counts the payload only. The size limit is checked before any
//! payload buffer is allocated.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Default maximum payload size (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

const MIN_BUFFER_CAPACITY: usize = 4096;

/// Frame header size: 4 bytes length + 4 bytes checksum
pub const HEADER_SIZE: usize = 8;

/// Frame encoding and decoding failures
#[derive(Debug, Error)]
pub enum FrameError {
    /// Payload exceeds the configured limit
    #[error("frame of {size} bytes exceeds maximum {max}")]
    TooLarge {
        /// Announced or actual payload size
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Payload was corrupted in transit
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum from the header
        expected: u32,
        /// Checksum of the received payload
        actual: u32,
    },

    /// Payload is not valid JSON for the expected type
    #[error("invalid frame payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[inline]
fn compute_checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Encode `msg` with the default size limit
///
/// # Errors
///
/// Serialization failure or a payload over [`MAX_FRAME_SIZE`].
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, FrameError> {
    encode_with_limit(msg, MAX_FRAME_SIZE)
}

/// Encode `msg`, rejecting payloads over `max_size`
///
/// # Errors
///
/// Serialization failure or an oversized payload.
pub fn encode_with_limit<T: Serialize>(msg: &T, max_size: usize) -> Result<Vec<u8>, FrameError> {
    let json = serde_json::to_vec(msg)?;
    if json.len() > max_size {
        return Err(FrameError::TooLarge {
            size: json.len(),
            max: max_size,
        });
    }

    let len = json.len() as u32;
    let checksum = compute_checksum(&json);

    let mut buf = Vec::with_capacity(HEADER_SIZE + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&checksum.to_be_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

/// Streaming frame decoder
///
/// Buffers incoming bytes and yields complete messages.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    read_pos: usize,
    max_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Decoder with the default size limit
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_size(MAX_FRAME_SIZE)
    }

    /// Decoder rejecting payloads over `max_size`
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
            max_size,
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet decoded
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Try to decode the next frame
    ///
    /// `Ok(None)` means more data is needed. After an error the stream is out
    /// of sync and the connection should be dropped.
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, FrameError> {
        let available = self.available();
        if available < HEADER_SIZE {
            return Ok(None);
        }

        let header = &self.buffer[self.read_pos..self.read_pos + HEADER_SIZE];
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let expected = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

        if len > self.max_size {
            return Err(FrameError::TooLarge {
                size: len,
                max: self.max_size,
            });
        }
        if available < HEADER_SIZE + len {
            return Ok(None);
        }

        let payload_start = self.read_pos + HEADER_SIZE;
        let payload_end = payload_start + len;
        let payload = &self.buffer[payload_start..payload_end];

        let actual = compute_checksum(payload);
        if actual != expected {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }

        let msg = serde_json::from_slice(payload)?;
        self.read_pos = payload_end;
        Ok(Some(msg))
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }
}

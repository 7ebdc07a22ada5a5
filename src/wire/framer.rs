//! Length-prefixed message framing for tokio_util.
//!
//! The first four bytes of every message are its total length (signed,
//! little-endian, header included). The framer buffers socket bytes and hands
//! out whole messages; each message taken is split off the front of the buffer.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use super::error::WireError;
use super::header::HEADER_SIZE;

/// Default maximum message size (64 MiB) used until the server declares one.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Splits a byte stream into complete wire messages.
#[derive(Debug)]
pub struct MessageFramer {
    /// Maximum accepted message size
    max_message_size: usize,
}

impl MessageFramer {
    /// Create a framer with the default size limit.
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Create a framer with a custom size limit.
    pub fn with_max_size(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Current size limit.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Replace the size limit, e.g. once the server has declared its own.
    pub fn set_max_message_size(&mut self, max_message_size: usize) {
        self.max_message_size = max_message_size;
    }

    /// Validate a declared length against the header size and the limit.
    fn check_length(&self, declared: i32) -> Result<usize, WireError> {
        if declared < HEADER_SIZE as i32 || declared as i64 > self.max_message_size as i64 {
            return Err(WireError::InvalidMessageSize {
                size: declared as i64,
                max: self.max_message_size,
            });
        }
        Ok(declared as usize)
    }
}

impl Default for MessageFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageFramer {
    type Item = BytesMut;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need the length prefix before anything else
        if src.len() < 4 {
            return Ok(None);
        }

        let declared = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        let length = self.check_length(declared)?;

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(length)))
    }
}

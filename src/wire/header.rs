//! Message header and opcodes.
//!
//! Every wire message starts with a 16-byte little-endian header:
//!
//! ```text
//! | messageLength (i32) | requestID (i32) | responseTo (i32) | opCode (i32) |
//! ```

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

use bytes::{Buf, BufMut};

use super::error::{WireError, WireResult};

/// Size of the message header in bytes.
pub const HEADER_SIZE: usize = 16;

static REQUEST_ID: AtomicI32 = AtomicI32::new(1);

/// Allocate the next request id.
///
/// Ids are process-wide so they stay unique across every connection; the
/// counter wraps back to 1 rather than going negative.
pub fn next_request_id() -> i32 {
    loop {
        let id = REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        if id > 0 {
            return id;
        }
        let _ = REQUEST_ID.compare_exchange(id.wrapping_add(1), 1, Ordering::Relaxed, Ordering::Relaxed);
    }
}

/// Wire opcodes understood by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum OpCode {
    /// OP_REPLY - legacy reply to OP_QUERY
    Reply = 1,
    /// OP_QUERY - legacy query/command
    Query = 2004,
    /// OP_COMPRESSED - compressed envelope around another message
    Compressed = 2012,
    /// OP_MSG - extensible message format
    Msg = 2013,
}

impl OpCode {
    /// Parse a raw opcode.
    pub fn from_i32(value: i32) -> WireResult<Self> {
        match value {
            1 => Ok(OpCode::Reply),
            2004 => Ok(OpCode::Query),
            2012 => Ok(OpCode::Compressed),
            2013 => Ok(OpCode::Msg),
            other => Err(WireError::UnknownOpCode(other)),
        }
    }

    /// Raw opcode value.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Name for logging.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Reply => "OP_REPLY",
            OpCode::Query => "OP_QUERY",
            OpCode::Compressed => "OP_COMPRESSED",
            OpCode::Msg => "OP_MSG",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parsed message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Total message length including this header
    pub length: i32,
    /// Identifier of this message
    pub request_id: i32,
    /// Request id this message answers (0 for requests)
    pub response_to: i32,
    /// Raw opcode
    pub op_code: i32,
}

impl MessageHeader {
    /// Build a request header; `response_to` is always 0.
    pub fn request(length: i32, request_id: i32, op_code: OpCode) -> Self {
        Self {
            length,
            request_id,
            response_to: 0,
            op_code: op_code.as_i32(),
        }
    }

    /// Read a header from the front of `src`.
    pub fn read(mut src: &[u8]) -> WireResult<Self> {
        if src.len() < HEADER_SIZE {
            return Err(WireError::Truncated(format!(
                "header needs {} bytes, got {}",
                HEADER_SIZE,
                src.len()
            )));
        }
        Ok(Self {
            length: src.get_i32_le(),
            request_id: src.get_i32_le(),
            response_to: src.get_i32_le(),
            op_code: src.get_i32_le(),
        })
    }

    /// Write the header.
    pub fn write(&self, dst: &mut impl BufMut) {
        dst.put_i32_le(self.length);
        dst.put_i32_le(self.request_id);
        dst.put_i32_le(self.response_to);
        dst.put_i32_le(self.op_code);
    }

    /// Typed opcode.
    pub fn op(&self) -> WireResult<OpCode> {
        OpCode::from_i32(self.op_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_values() {
        assert_eq!(OpCode::Reply.as_i32(), 1);
        assert_eq!(OpCode::Query.as_i32(), 2004);
        assert_eq!(OpCode::Compressed.as_i32(), 2012);
        assert_eq!(OpCode::Msg.as_i32(), 2013);
        assert!(matches!(OpCode::from_i32(2010), Err(WireError::UnknownOpCode(2010))));
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let header = MessageHeader::request(0x20, 7, OpCode::Msg);
        let mut buf = Vec::new();
        header.write(&mut buf);

        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[0..4], &[0x20, 0, 0, 0]);
        assert_eq!(&buf[4..8], &[7, 0, 0, 0]);
        assert_eq!(&buf[8..12], &[0, 0, 0, 0]);
        assert_eq!(&buf[12..16], &2013i32.to_le_bytes());

        let parsed = MessageHeader::read(&buf).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_short_header() {
        assert!(matches!(MessageHeader::read(&[0u8; 10]), Err(WireError::Truncated(_))));
    }

    #[test]
    fn test_request_ids_increase() {
        let a = next_request_id();
        let b = next_request_id();
        assert!(a > 0);
        assert!(b > a);
    }
}

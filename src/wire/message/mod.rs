//! Wire message types.
//!
//! Outbound commands are written as OP_MSG or, for old servers and sharded
//! secondary reads on the legacy path, OP_QUERY. Inbound replies arrive as
//! OP_MSG or OP_REPLY and are parsed into a [`ReplyEnvelope`].

pub mod reply;
pub mod request;

pub use reply::{DecodeOptions, DocumentSequenceRef, OpReply, ReplyEnvelope};
pub use request::{DocumentSequence, OpMsg, OpQuery, OutboundMessage};

use bytes::{Buf, BufMut};

use super::error::{WireError, WireResult};

/// OP_MSG flag bits.
pub mod msg_flags {
    /// A CRC-32C checksum trails the sections
    pub const CHECKSUM_PRESENT: u32 = 1 << 0;
    /// The sender will send another message without waiting for a request
    pub const MORE_TO_COME: u32 = 1 << 1;
    /// The client is prepared for multiple replies to this request
    pub const EXHAUST_ALLOWED: u32 = 1 << 16;
    /// Bits a receiver must understand
    pub const REQUIRED_MASK: u32 = 0xFFFF;
}

/// OP_QUERY flag bits.
pub mod query_flags {
    /// Tailable cursor
    pub const TAILABLE_CURSOR: i32 = 1 << 1;
    /// Reads may be served by a non-primary member
    pub const SECONDARY_OK: i32 = 1 << 2;
    /// Never time out the server-side cursor
    pub const NO_CURSOR_TIMEOUT: i32 = 1 << 4;
    /// Block at the end of a tailable cursor
    pub const AWAIT_DATA: i32 = 1 << 5;
    /// Stream all batches without further requests
    pub const EXHAUST: i32 = 1 << 6;
    /// Partial results from a sharded cluster are acceptable
    pub const PARTIAL: i32 = 1 << 7;
}

/// OP_REPLY response flag bits.
pub mod reply_flags {
    /// The cursor id given in a getMore was not found
    pub const CURSOR_NOT_FOUND: i32 = 1 << 0;
    /// The query failed; the single document holds `$err`
    pub const QUERY_FAILURE: i32 = 1 << 1;
    /// Sharding configuration is stale
    pub const SHARD_CONFIG_STALE: i32 = 1 << 2;
    /// The server supports AwaitData
    pub const AWAIT_CAPABLE: i32 = 1 << 3;
}

/// OP_MSG section kinds.
pub(crate) mod section {
    /// Single body document
    pub const BODY: u8 = 0;
    /// Identified document sequence
    pub const SEQUENCE: u8 = 1;
}

/// Write a NUL-terminated string.
pub(crate) fn put_cstring(dst: &mut impl BufMut, value: &str) -> WireResult<()> {
    if value.as_bytes().contains(&0) {
        return Err(WireError::Malformed(format!(
            "string {:?} contains an interior NUL",
            value
        )));
    }
    dst.put_slice(value.as_bytes());
    dst.put_u8(0);
    Ok(())
}

/// Read a NUL-terminated string, advancing `src`.
pub(crate) fn get_cstring(src: &mut &[u8]) -> WireResult<String> {
    let end = src
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| WireError::Truncated("unterminated cstring".to_string()))?;
    let value = std::str::from_utf8(&src[..end])
        .map_err(|e| WireError::Malformed(format!("cstring is not UTF-8: {}", e)))?
        .to_string();
    src.advance(end + 1);
    Ok(value)
}

/// Read one length-prefixed document, advancing `src`.
///
/// Framing problems are wire errors; the document contents are validated by
/// the document codec and its errors pass through as-is.
pub(crate) fn get_document(src: &mut &[u8]) -> WireResult<bson::RawDocumentBuf> {
    if src.len() < 4 {
        return Err(WireError::Truncated(format!(
            "document length needs 4 bytes, got {}",
            src.len()
        )));
    }
    let declared = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
    if declared < 5 {
        return Err(WireError::Malformed(format!(
            "document length {} is below the minimum of 5",
            declared
        )));
    }
    let length = declared as usize;
    if length > src.len() {
        return Err(WireError::Truncated(format!(
            "document declares {} bytes, {} available",
            length,
            src.len()
        )));
    }
    let doc = bson::RawDocumentBuf::from_bytes(src[..length].to_vec())?;
    src.advance(length);
    Ok(doc)
}

/// Serialize a document into `dst`.
pub(crate) fn put_document(dst: &mut Vec<u8>, doc: &bson::Document) -> WireResult<()> {
    doc.to_writer(dst)?;
    Ok(())
}

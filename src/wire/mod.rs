//! Wire protocol
//!
//! Low-level message layer: framing, the two outbound command formats, the
//! two inbound reply formats and the compressed envelope.
//!
//! # Message layout
//!
//! ```text
//! +----------------+----------------+----------------+----------------+----------------
//! | length (i32)   | requestId (i32)| responseTo(i32)| opCode (i32)   | body ...
//! +----------------+----------------+----------------+----------------+----------------
//! ```
//!
//! All integers are little-endian.

pub mod compression;
pub mod error;
pub mod framer;
pub mod header;
pub mod message;

pub use compression::{can_compress, compress_message, decompress_message, Compressor};
pub use error::{WireError, WireResult};
pub use framer::{MessageFramer, DEFAULT_MAX_MESSAGE_SIZE};
pub use header::{next_request_id, MessageHeader, OpCode, HEADER_SIZE};
pub use message::{
    DecodeOptions, DocumentSequence, DocumentSequenceRef, OpMsg, OpQuery, OpReply,
    OutboundMessage, ReplyEnvelope,
};

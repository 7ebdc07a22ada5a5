//! OP_COMPRESSED envelopes.
//!
//! ```text
//! | header (opCode = 2012) | originalOpcode (i32) | uncompressedSize (i32) | compressorId (u8) | compressed body |
//! ```
//!
//! Outbound messages are wrapped only when a compressor was agreed during the
//! handshake and the command is not on the uncompressible list. Inbound
//! messages are always checked for the compressed opcode and unwrapped.

use std::fmt;
use std::io::{Read, Write};

use bytes::{Buf, BufMut, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use super::error::{WireError, WireResult};
use super::header::{MessageHeader, OpCode, HEADER_SIZE};

/// Bytes between the header and the compressed body.
const COMPRESSED_PREAMBLE: usize = 9;

/// Default zstd level.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Commands whose payload is never compressed.
pub const UNCOMPRESSIBLE_COMMANDS: [&str; 11] = [
    "hello",
    "ismaster",
    "saslstart",
    "saslcontinue",
    "getnonce",
    "authenticate",
    "createuser",
    "updateuser",
    "copydbsaslstart",
    "copydbgetnonce",
    "copydb",
];

/// Whether a command (by its first key) may be compressed.
pub fn can_compress(command_name: &str) -> bool {
    let lower = command_name.to_ascii_lowercase();
    !UNCOMPRESSIBLE_COMMANDS.contains(&lower.as_str())
}

/// Wire compressors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compressor {
    /// Id 0: payload carried as-is inside the envelope
    Noop,
    /// Id 1: recognised but not linked into this build
    Snappy,
    /// Id 2: zlib with a level in -1..=9 (-1 = library default)
    Zlib { level: i32 },
    /// Id 3: zstd
    Zstd { level: i32 },
}

impl Compressor {
    /// Protocol compressor id.
    pub fn id(&self) -> u8 {
        match self {
            Compressor::Noop => 0,
            Compressor::Snappy => 1,
            Compressor::Zlib { .. } => 2,
            Compressor::Zstd { .. } => 3,
        }
    }

    /// Name used in handshake negotiation.
    pub fn name(&self) -> &'static str {
        match self {
            Compressor::Noop => "noop",
            Compressor::Snappy => "snappy",
            Compressor::Zlib { .. } => "zlib",
            Compressor::Zstd { .. } => "zstd",
        }
    }

    /// Compressor for an inbound id. Levels only matter when compressing.
    pub fn from_id(id: u8) -> WireResult<Self> {
        match id {
            0 => Ok(Compressor::Noop),
            1 => Ok(Compressor::Snappy),
            2 => Ok(Compressor::Zlib { level: -1 }),
            3 => Ok(Compressor::Zstd {
                level: DEFAULT_ZSTD_LEVEL,
            }),
            other => Err(WireError::UnknownCompressor(other)),
        }
    }

    /// Compressor for a negotiated name, or `None` for names this build cannot use.
    pub fn from_name(name: &str, zlib_level: Option<i32>) -> Option<Self> {
        match name {
            "noop" => Some(Compressor::Noop),
            "zlib" => Some(Compressor::Zlib {
                level: zlib_level.unwrap_or(-1),
            }),
            "zstd" => Some(Compressor::Zstd {
                level: DEFAULT_ZSTD_LEVEL,
            }),
            _ => None,
        }
    }

    /// Compress a message body.
    pub fn compress(&self, data: &[u8]) -> WireResult<Vec<u8>> {
        match self {
            Compressor::Noop => Ok(data.to_vec()),
            Compressor::Snappy => Err(WireError::CompressorUnavailable("snappy")),
            Compressor::Zlib { level } => {
                let level = if *level < 0 {
                    flate2::Compression::default()
                } else {
                    flate2::Compression::new((*level).min(9) as u32)
                };
                let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len()), level);
                encoder
                    .write_all(data)
                    .map_err(|e| WireError::Compression(format!("zlib: {}", e)))?;
                encoder
                    .finish()
                    .map_err(|e| WireError::Compression(format!("zlib: {}", e)))
            }
            Compressor::Zstd { level } => zstd::bulk::compress(data, *level)
                .map_err(|e| WireError::Compression(format!("zstd: {}", e))),
        }
    }

    /// Decompress a message body of known uncompressed size.
    pub fn decompress(&self, data: &[u8], uncompressed_size: usize) -> WireResult<Vec<u8>> {
        let out = match self {
            Compressor::Noop => data.to_vec(),
            Compressor::Snappy => return Err(WireError::CompressorUnavailable("snappy")),
            Compressor::Zlib { .. } => {
                let mut out = Vec::with_capacity(uncompressed_size);
                // one extra byte is enough to detect an overrun
                ZlibDecoder::new(data)
                    .take(uncompressed_size as u64 + 1)
                    .read_to_end(&mut out)
                    .map_err(|e| WireError::Compression(format!("zlib: {}", e)))?;
                out
            }
            Compressor::Zstd { .. } => zstd::bulk::decompress(data, uncompressed_size)
                .map_err(|e| WireError::Compression(format!("zstd: {}", e)))?,
        };

        if out.len() != uncompressed_size {
            return Err(WireError::Compression(format!(
                "{} produced {} bytes, header declared {}",
                self.name(),
                out.len(),
                uncompressed_size
            )));
        }
        Ok(out)
    }
}

impl fmt::Display for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Wrap a complete encoded message (header included) in an OP_COMPRESSED envelope.
pub fn compress_message(message: &[u8], compressor: Compressor) -> WireResult<BytesMut> {
    let header = MessageHeader::read(message)?;
    let body = &message[HEADER_SIZE..];
    let compressed = compressor.compress(body)?;

    let length = HEADER_SIZE + COMPRESSED_PREAMBLE + compressed.len();
    let mut out = BytesMut::with_capacity(length);
    MessageHeader {
        length: length as i32,
        request_id: header.request_id,
        response_to: header.response_to,
        op_code: OpCode::Compressed.as_i32(),
    }
    .write(&mut out);
    out.put_i32_le(header.op_code);
    out.put_i32_le(body.len() as i32);
    out.put_u8(compressor.id());
    out.put_slice(&compressed);
    Ok(out)
}

/// If `message` is an OP_COMPRESSED envelope, return the inner message with a
/// rebuilt header; otherwise return it unchanged.
///
/// The declared uncompressed size is held to the same `max_message_size` the
/// framer enforces, before anything is inflated.
pub fn decompress_message(message: BytesMut, max_message_size: usize) -> WireResult<BytesMut> {
    let header = MessageHeader::read(&message)?;
    if header.op_code != OpCode::Compressed.as_i32() {
        return Ok(message);
    }

    let mut rest = &message[HEADER_SIZE..];
    if rest.len() < COMPRESSED_PREAMBLE {
        return Err(WireError::Truncated(
            "OP_COMPRESSED preamble is incomplete".to_string(),
        ));
    }
    let original_op = rest.get_i32_le();
    let uncompressed_size = rest.get_i32_le();
    let compressor = Compressor::from_id(rest.get_u8())?;

    if uncompressed_size < 0 {
        return Err(WireError::Malformed(format!(
            "negative uncompressed size {}",
            uncompressed_size
        )));
    }
    let inflated_length = HEADER_SIZE + uncompressed_size as usize;
    if inflated_length > max_message_size {
        return Err(WireError::InvalidMessageSize {
            size: inflated_length as i64,
            max: max_message_size,
        });
    }

    let body = compressor.decompress(rest, uncompressed_size as usize)?;
    let length = HEADER_SIZE + body.len();
    let mut out = BytesMut::with_capacity(length);
    MessageHeader {
        length: length as i32,
        request_id: header.request_id,
        response_to: header.response_to,
        op_code: original_op,
    }
    .write(&mut out);
    out.put_slice(&body);
    Ok(out)
}

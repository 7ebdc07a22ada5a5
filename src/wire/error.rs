//! Wire protocol error types.

use std::fmt;
use std::io;

/// Result type for wire-level operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors raised while framing, encoding or decoding wire messages.
///
/// Every variant except [`WireError::Document`] originates in this layer.
/// `Document` carries a failure from the document codec itself and is passed
/// through without being rewritten.
#[derive(Debug)]
pub enum WireError {
    /// I/O error
    Io(io::Error),

    /// Declared message length is negative, below the header size, or above the limit
    InvalidMessageSize { size: i64, max: usize },

    /// Message or section ended before all declared bytes were present
    Truncated(String),

    /// Structurally invalid message (bad section kind, bad cstring, ...)
    Malformed(String),

    /// Opcode this client does not decode
    UnknownOpCode(i32),

    /// OP_MSG checksum did not match the payload
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Compressor id that is not defined by the protocol
    UnknownCompressor(u8),

    /// Compressor defined by the protocol but not linked into this build
    CompressorUnavailable(&'static str),

    /// Compression or decompression failed
    Compression(String),

    /// Error from the document codec
    Document(String),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Io(e) => write!(f, "I/O error: {}", e),
            WireError::InvalidMessageSize { size, max } => {
                write!(f, "Invalid message size: {}, max allowed: {}", size, max)
            }
            WireError::Truncated(msg) => write!(f, "Truncated message: {}", msg),
            WireError::Malformed(msg) => write!(f, "Malformed message: {}", msg),
            WireError::UnknownOpCode(op) => write!(f, "Unsupported opcode: {}", op),
            WireError::ChecksumMismatch { expected, actual } => write!(
                f,
                "OP_MSG checksum mismatch: expected 0x{:08X}, computed 0x{:08X}",
                expected, actual
            ),
            WireError::UnknownCompressor(id) => write!(f, "Unknown compressor id: {}", id),
            WireError::CompressorUnavailable(name) => {
                write!(f, "Compressor '{}' is not available in this build", name)
            }
            WireError::Compression(msg) => write!(f, "Compression error: {}", msg),
            WireError::Document(msg) => write!(f, "{}", msg),
        }
    }
}

impl WireError {
    /// Whether this failure came from the document codec rather than the wire layer.
    pub fn is_document_error(&self) -> bool {
        matches!(self, WireError::Document(_))
    }

    /// Whether this failure means a dependency is missing rather than the data is bad.
    pub fn is_missing_dependency(&self) -> bool {
        matches!(self, WireError::CompressorUnavailable(_))
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WireError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WireError {
    fn from(err: io::Error) -> Self {
        WireError::Io(err)
    }
}

impl From<bson::de::Error> for WireError {
    fn from(err: bson::de::Error) -> Self {
        WireError::Document(err.to_string())
    }
}

impl From<bson::ser::Error> for WireError {
    fn from(err: bson::ser::Error) -> Self {
        WireError::Document(err.to_string())
    }
}

impl From<bson::raw::Error> for WireError {
    fn from(err: bson::raw::Error) -> Self {
        WireError::Document(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_size_display() {
        let err = WireError::InvalidMessageSize { size: -1, max: 100 };
        assert_eq!(err.to_string(), "Invalid message size: -1, max allowed: 100");
    }

    #[test]
    fn test_wire_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let err: WireError = io_err.into();
        assert!(matches!(err, WireError::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_document_error_passthrough() {
        let bytes = [0x05u8, 0x00, 0x00];
        let err: WireError = bson::Document::from_reader(&mut &bytes[..])
            .unwrap_err()
            .into();
        assert!(err.is_document_error());
        assert!(!err.to_string().starts_with("Malformed"));
    }

    #[test]
    fn test_missing_dependency_flag() {
        assert!(WireError::CompressorUnavailable("snappy").is_missing_dependency());
        assert!(!WireError::UnknownCompressor(9).is_missing_dependency());
    }
}

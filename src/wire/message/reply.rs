//! Inbound replies.
//!
//! Both reply opcodes are parsed into one [`ReplyEnvelope`]. Documents are kept
//! as raw bytes until the caller decodes them with its [`DecodeOptions`].

use bson::serde_helpers::Utf8LossyDeserialization;
use bson::{Bson, Document, RawDocumentBuf};
use bytes::{Buf, BufMut, BytesMut};

use super::request::frame;
use super::{get_cstring, get_document, msg_flags, put_document, reply_flags, section};
use crate::wire::error::{WireError, WireResult};
use crate::wire::header::{MessageHeader, OpCode, HEADER_SIZE};

const CRC32C: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI);

/// Flag bits this client knows how to handle in the required range.
const KNOWN_REQUIRED_FLAGS: u32 = msg_flags::CHECKSUM_PRESENT | msg_flags::MORE_TO_COME;

/// Per-operation reply decoding options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Also hand the undecoded reply bytes to the caller
    pub raw: bool,
    /// Reject invalid UTF-8 in strings instead of replacing it
    pub validate_utf8: bool,
    /// For legacy replies: field under `cursor` that receives the returned documents
    pub documents_returned_in: Option<String>,
}

impl DecodeOptions {
    /// Strict decoding, no raw bytes.
    pub fn new() -> Self {
        Self {
            raw: false,
            validate_utf8: true,
            documents_returned_in: None,
        }
    }

    /// Keep the raw reply bytes.
    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    /// Toggle UTF-8 validation.
    pub fn with_validate_utf8(mut self, validate: bool) -> Self {
        self.validate_utf8 = validate;
        self
    }

    /// Set the legacy document-return field.
    pub fn with_documents_returned_in(mut self, field: impl Into<String>) -> Self {
        self.documents_returned_in = Some(field.into());
        self
    }
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A kind-1 section of an inbound OP_MSG.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSequenceRef {
    /// Field name the documents belong to
    pub identifier: String,
    /// The undecoded documents
    pub documents: Vec<RawDocumentBuf>,
}

/// A parsed inbound message.
#[derive(Debug, Clone)]
pub struct ReplyEnvelope {
    /// Id of this reply; the next reply of a moreToCome stream answers it
    pub request_id: i32,
    /// Id of the request this reply answers
    pub response_to: i32,
    /// Opcode the reply arrived as (after decompression)
    pub op_code: OpCode,
    /// OP_MSG flag bits (0 for OP_REPLY)
    pub flags: u32,
    /// OP_REPLY response flags (0 for OP_MSG)
    pub response_flags: i32,
    /// Whether the server will send more replies without a new request
    pub more_to_come: bool,
    /// OP_REPLY cursor id
    pub cursor_id: Option<i64>,
    /// Payload documents: the OP_MSG body, or every OP_REPLY document
    pub documents: Vec<RawDocumentBuf>,
    /// OP_MSG document sequences
    pub sequences: Vec<DocumentSequenceRef>,
}

impl ReplyEnvelope {
    /// Parse a complete, already decompressed message.
    pub fn parse(message: &[u8]) -> WireResult<Self> {
        let header = MessageHeader::read(message)?;
        if header.length as usize != message.len() {
            return Err(WireError::Malformed(format!(
                "header declares {} bytes, message has {}",
                header.length,
                message.len()
            )));
        }
        match header.op()? {
            OpCode::Msg => Self::parse_msg(&header, message),
            OpCode::Reply => Self::parse_reply(&header, &message[HEADER_SIZE..]),
            other => Err(WireError::Malformed(format!(
                "{} is not a reply opcode",
                other
            ))),
        }
    }

    fn parse_msg(header: &MessageHeader, message: &[u8]) -> WireResult<Self> {
        let mut rest = &message[HEADER_SIZE..];
        if rest.len() < 4 {
            return Err(WireError::Truncated("OP_MSG flags".to_string()));
        }
        let flags = rest.get_u32_le();

        let unknown = flags & msg_flags::REQUIRED_MASK & !KNOWN_REQUIRED_FLAGS;
        if unknown != 0 {
            return Err(WireError::Malformed(format!(
                "unsupported required OP_MSG flag bits 0x{:04X}",
                unknown
            )));
        }

        if flags & msg_flags::CHECKSUM_PRESENT != 0 {
            if rest.len() < 4 {
                return Err(WireError::Truncated("OP_MSG checksum".to_string()));
            }
            let split = message.len() - 4;
            let tail = &message[split..];
            let expected = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
            let actual = CRC32C.checksum(&message[..split]);
            if expected != actual {
                return Err(WireError::ChecksumMismatch { expected, actual });
            }
            rest = &rest[..rest.len() - 4];
        }

        let mut body = None;
        let mut sequences = Vec::new();
        while !rest.is_empty() {
            match rest.get_u8() {
                section::BODY => {
                    if body.is_some() {
                        return Err(WireError::Malformed(
                            "OP_MSG has more than one body section".to_string(),
                        ));
                    }
                    body = Some(get_document(&mut rest)?);
                }
                section::SEQUENCE => sequences.push(parse_sequence(&mut rest)?),
                kind => {
                    return Err(WireError::Malformed(format!(
                        "unknown OP_MSG section kind {}",
                        kind
                    )))
                }
            }
        }

        let body = body
            .ok_or_else(|| WireError::Malformed("OP_MSG has no body section".to_string()))?;

        Ok(Self {
            request_id: header.request_id,
            response_to: header.response_to,
            op_code: OpCode::Msg,
            flags,
            response_flags: 0,
            more_to_come: flags & msg_flags::MORE_TO_COME != 0,
            cursor_id: None,
            documents: vec![body],
            sequences,
        })
    }

    fn parse_reply(header: &MessageHeader, mut rest: &[u8]) -> WireResult<Self> {
        if rest.len() < 20 {
            return Err(WireError::Truncated(format!(
                "OP_REPLY preamble needs 20 bytes, got {}",
                rest.len()
            )));
        }
        let response_flags = rest.get_i32_le();
        let cursor_id = rest.get_i64_le();
        let _starting_from = rest.get_i32_le();
        let number_returned = rest.get_i32_le();
        if number_returned < 0 {
            return Err(WireError::Malformed(format!(
                "negative numberReturned {}",
                number_returned
            )));
        }

        // numberReturned is untrusted; each document takes at least 5 bytes
        let mut documents = Vec::with_capacity((number_returned as usize).min(rest.len() / 5));
        for _ in 0..number_returned {
            documents.push(get_document(&mut rest)?);
        }
        if !rest.is_empty() {
            return Err(WireError::Malformed(format!(
                "{} trailing bytes after {} OP_REPLY documents",
                rest.len(),
                number_returned
            )));
        }

        Ok(Self {
            request_id: header.request_id,
            response_to: header.response_to,
            op_code: OpCode::Reply,
            flags: 0,
            response_flags,
            more_to_come: false,
            cursor_id: Some(cursor_id),
            documents,
            sequences: Vec::new(),
        })
    }

    /// Whether an OP_REPLY flagged QueryFailure.
    pub fn query_failure(&self) -> bool {
        self.response_flags & reply_flags::QUERY_FAILURE != 0
    }

    /// Whether an OP_REPLY flagged CursorNotFound.
    pub fn cursor_not_found(&self) -> bool {
        self.response_flags & reply_flags::CURSOR_NOT_FOUND != 0
    }

    /// The first raw payload document, if any.
    pub fn raw_body(&self) -> Option<&RawDocumentBuf> {
        self.documents.first()
    }

    /// Decode the reply payload into one document.
    ///
    /// For OP_MSG this is the body with every document sequence folded in as an
    /// array under its identifier. For OP_REPLY this is the first document, or,
    /// when `documents_returned_in` is set, a cursor reply wrapping all of them.
    pub fn decode(&self, options: &DecodeOptions) -> WireResult<Option<Document>> {
        if let (OpCode::Reply, Some(field)) = (self.op_code, &options.documents_returned_in) {
            let mut batch = Vec::with_capacity(self.documents.len());
            for raw in &self.documents {
                batch.push(Bson::Document(decode_one(raw, options)?));
            }
            let mut cursor = Document::new();
            cursor.insert("id", self.cursor_id.unwrap_or(0));
            cursor.insert(field.as_str(), batch);
            let mut reply = Document::new();
            reply.insert("cursor", cursor);
            reply.insert("ok", 1);
            return Ok(Some(reply));
        }

        let Some(raw) = self.documents.first() else {
            return Ok(None);
        };
        let mut body = decode_one(raw, options)?;
        for sequence in &self.sequences {
            let mut docs = Vec::with_capacity(sequence.documents.len());
            for raw in &sequence.documents {
                docs.push(Bson::Document(decode_one(raw, options)?));
            }
            body.insert(sequence.identifier.clone(), docs);
        }
        Ok(Some(body))
    }
}

fn parse_sequence(rest: &mut &[u8]) -> WireResult<DocumentSequenceRef> {
    if rest.len() < 4 {
        return Err(WireError::Truncated("document sequence size".to_string()));
    }
    let size = rest.get_i32_le();
    if size < 4 || (size as usize - 4) > rest.len() {
        return Err(WireError::Truncated(format!(
            "document sequence declares {} bytes, {} available",
            size,
            rest.len() + 4
        )));
    }
    let (mut section, tail) = rest.split_at(size as usize - 4);
    *rest = tail;

    let identifier = get_cstring(&mut section)?;
    let mut documents = Vec::new();
    while !section.is_empty() {
        documents.push(get_document(&mut section)?);
    }
    Ok(DocumentSequenceRef {
        identifier,
        documents,
    })
}

fn decode_one(raw: &RawDocumentBuf, options: &DecodeOptions) -> WireResult<Document> {
    let doc = if options.validate_utf8 {
        Document::from_reader(raw.as_bytes())?
    } else {
        bson::from_slice::<Utf8LossyDeserialization<Document>>(raw.as_bytes())?.0
    };
    Ok(doc)
}

/// OP_REPLY builder, for servers and test doubles.
#[derive(Debug, Clone, Default)]
pub struct OpReply {
    /// Request id in the header
    pub request_id: i32,
    /// Request this answers
    pub response_to: i32,
    /// Response flags
    pub response_flags: i32,
    /// Cursor id
    pub cursor_id: i64,
    /// Position of the first document in the cursor
    pub starting_from: i32,
    /// Returned documents
    pub documents: Vec<Document>,
}

impl OpReply {
    /// A reply with a single document.
    pub fn new(request_id: i32, response_to: i32, document: Document) -> Self {
        Self {
            request_id,
            response_to,
            documents: vec![document],
            ..Default::default()
        }
    }

    /// Encode the full message.
    pub fn encode(&self) -> WireResult<BytesMut> {
        let mut payload = Vec::with_capacity(128);
        payload.put_i32_le(self.response_flags);
        payload.put_i64_le(self.cursor_id);
        payload.put_i32_le(self.starting_from);
        payload.put_i32_le(self.documents.len() as i32);
        for doc in &self.documents {
            put_document(&mut payload, doc)?;
        }
        Ok(frame(self.request_id, self.response_to, OpCode::Reply, &payload))
    }
}

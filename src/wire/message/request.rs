//! Outbound command messages.

use bson::Document;
use bytes::{Buf, BufMut, BytesMut};

use super::{get_cstring, get_document, msg_flags, put_cstring, put_document, section};
use crate::wire::error::{WireError, WireResult};
use crate::wire::header::{MessageHeader, OpCode, HEADER_SIZE};

/// A kind-1 OP_MSG section: documents carried beside the body under an identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSequence {
    /// Field name the documents belong to (e.g. `documents` for insert)
    pub identifier: String,
    /// The documents
    pub documents: Vec<Document>,
}

impl DocumentSequence {
    /// Create a new sequence.
    pub fn new(identifier: impl Into<String>, documents: Vec<Document>) -> Self {
        Self {
            identifier: identifier.into(),
            documents,
        }
    }
}

/// OP_MSG - modern command message.
#[derive(Debug, Clone)]
pub struct OpMsg {
    /// Request id in the header
    pub request_id: i32,
    /// Response-to id in the header (non-zero only for server replies)
    pub response_to: i32,
    /// Flag bits
    pub flags: u32,
    /// Body section (kind 0)
    pub body: Document,
    /// Document sequences (kind 1)
    pub sequences: Vec<DocumentSequence>,
}

impl OpMsg {
    /// Create a message with a body and no flags.
    pub fn new(request_id: i32, body: Document) -> Self {
        Self {
            request_id,
            response_to: 0,
            flags: 0,
            body,
            sequences: Vec::new(),
        }
    }

    /// Set the response-to id.
    pub fn with_response_to(mut self, response_to: i32) -> Self {
        self.response_to = response_to;
        self
    }

    /// Set or clear the moreToCome bit.
    pub fn with_more_to_come(mut self, more_to_come: bool) -> Self {
        self.set_flag(msg_flags::MORE_TO_COME, more_to_come);
        self
    }

    /// Set or clear the exhaustAllowed bit.
    pub fn with_exhaust_allowed(mut self, exhaust_allowed: bool) -> Self {
        self.set_flag(msg_flags::EXHAUST_ALLOWED, exhaust_allowed);
        self
    }

    /// Append a document sequence.
    pub fn with_sequence(mut self, sequence: DocumentSequence) -> Self {
        self.sequences.push(sequence);
        self
    }

    fn set_flag(&mut self, bit: u32, on: bool) {
        if on {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
    }

    /// Whether the moreToCome bit is set.
    pub fn more_to_come(&self) -> bool {
        self.flags & msg_flags::MORE_TO_COME != 0
    }

    /// Encode the full message, header included.
    pub fn encode(&self) -> WireResult<BytesMut> {
        let mut payload = Vec::with_capacity(256);
        payload.put_u32_le(self.flags & !msg_flags::CHECKSUM_PRESENT);

        payload.put_u8(section::BODY);
        put_document(&mut payload, &self.body)?;

        for sequence in &self.sequences {
            let mut docs = Vec::new();
            for doc in &sequence.documents {
                put_document(&mut docs, doc)?;
            }
            let size = 4 + sequence.identifier.len() + 1 + docs.len();
            payload.put_u8(section::SEQUENCE);
            payload.put_i32_le(size as i32);
            put_cstring(&mut payload, &sequence.identifier)?;
            payload.put_slice(&docs);
        }

        Ok(frame(self.request_id, self.response_to, OpCode::Msg, &payload))
    }
}

/// OP_QUERY - legacy command message.
#[derive(Debug, Clone)]
pub struct OpQuery {
    /// Request id in the header
    pub request_id: i32,
    /// Flag bits
    pub flags: i32,
    /// `<db>.<collection>`, `<db>.$cmd` for commands
    pub full_collection_name: String,
    /// Documents to skip
    pub number_to_skip: i32,
    /// Documents to return (-1 for a single batch, as used by commands)
    pub number_to_return: i32,
    /// Query or command document
    pub query: Document,
}

impl OpQuery {
    /// Create a command query against `<db>.$cmd`.
    pub fn command(request_id: i32, database: &str, query: Document) -> Self {
        Self {
            request_id,
            flags: 0,
            full_collection_name: format!("{}.$cmd", database),
            number_to_skip: 0,
            number_to_return: -1,
            query,
        }
    }

    /// Add flag bits.
    pub fn with_flags(mut self, flags: i32) -> Self {
        self.flags |= flags;
        self
    }

    /// Encode the full message, header included.
    pub fn encode(&self) -> WireResult<BytesMut> {
        let mut payload = Vec::with_capacity(256);
        payload.put_i32_le(self.flags);
        put_cstring(&mut payload, &self.full_collection_name)?;
        payload.put_i32_le(self.number_to_skip);
        payload.put_i32_le(self.number_to_return);
        put_document(&mut payload, &self.query)?;

        Ok(frame(self.request_id, 0, OpCode::Query, &payload))
    }

    /// Parse an encoded OP_QUERY (used by servers and test doubles).
    pub fn parse(message: &[u8]) -> WireResult<Self> {
        let header = MessageHeader::read(message)?;
        if header.op_code != OpCode::Query.as_i32() {
            return Err(WireError::Malformed(format!(
                "expected OP_QUERY, found opcode {}",
                header.op_code
            )));
        }
        let mut rest = &message[HEADER_SIZE..];
        if rest.len() < 4 {
            return Err(WireError::Truncated("OP_QUERY flags".to_string()));
        }
        let flags = rest.get_i32_le();
        let full_collection_name = get_cstring(&mut rest)?;
        if rest.len() < 8 {
            return Err(WireError::Truncated("OP_QUERY skip/return".to_string()));
        }
        let number_to_skip = rest.get_i32_le();
        let number_to_return = rest.get_i32_le();
        let query = get_document(&mut rest)?.to_document()?;

        Ok(Self {
            request_id: header.request_id,
            flags,
            full_collection_name,
            number_to_skip,
            number_to_return,
            query,
        })
    }
}

/// A dispatch-ready command in one of the two outbound formats.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Modern format
    Msg(OpMsg),
    /// Legacy format
    Query(OpQuery),
}

impl OutboundMessage {
    /// Request id in the header.
    pub fn request_id(&self) -> i32 {
        match self {
            OutboundMessage::Msg(msg) => msg.request_id,
            OutboundMessage::Query(query) => query.request_id,
        }
    }

    /// Opcode the message is sent with before compression.
    pub fn op_code(&self) -> OpCode {
        match self {
            OutboundMessage::Msg(_) => OpCode::Msg,
            OutboundMessage::Query(_) => OpCode::Query,
        }
    }

    /// The command document as it goes on the wire.
    pub fn command_document(&self) -> &Document {
        match self {
            OutboundMessage::Msg(msg) => &msg.body,
            OutboundMessage::Query(query) => &query.query,
        }
    }

    /// The command name: the first key of the command, looking through a
    /// `$query` wrapper.
    pub fn command_name(&self) -> &str {
        let doc = self.command_document();
        let doc = match doc.get_document("$query") {
            Ok(inner) => inner,
            Err(_) => doc,
        };
        doc.keys().next().map(String::as_str).unwrap_or("")
    }

    /// Whether the sender does not expect a reply (OP_MSG moreToCome).
    pub fn more_to_come(&self) -> bool {
        match self {
            OutboundMessage::Msg(msg) => msg.more_to_come(),
            OutboundMessage::Query(_) => false,
        }
    }

    /// Encode the full message.
    pub fn encode(&self) -> WireResult<BytesMut> {
        match self {
            OutboundMessage::Msg(msg) => msg.encode(),
            OutboundMessage::Query(query) => query.encode(),
        }
    }
}

/// Prefix a payload with a header.
pub(crate) fn frame(request_id: i32, response_to: i32, op_code: OpCode, payload: &[u8]) -> BytesMut {
    let length = HEADER_SIZE + payload.len();
    let mut out = BytesMut::with_capacity(length);
    MessageHeader {
        length: length as i32,
        request_id,
        response_to,
        op_code: op_code.as_i32(),
    }
    .write(&mut out);
    out.put_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_op_msg_layout() {
        let msg = OpMsg::new(5, doc! { "ping": 1, "$db": "admin" });
        let bytes = msg.encode().unwrap();

        let header = MessageHeader::read(&bytes).unwrap();
        assert_eq!(header.length as usize, bytes.len());
        assert_eq!(header.request_id, 5);
        assert_eq!(header.response_to, 0);
        assert_eq!(header.op_code, 2013);

        // flags, then a kind-0 section
        assert_eq!(&bytes[16..20], &[0, 0, 0, 0]);
        assert_eq!(bytes[20], 0);
    }

    #[test]
    fn test_op_msg_flags() {
        let msg = OpMsg::new(1, doc! { "hello": 1 })
            .with_more_to_come(true)
            .with_exhaust_allowed(true);
        assert!(msg.more_to_come());
        let bytes = msg.encode().unwrap();
        let flags = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        assert_eq!(flags, msg_flags::MORE_TO_COME | msg_flags::EXHAUST_ALLOWED);

        let msg = msg.with_more_to_come(false);
        assert!(!msg.more_to_come());
    }

    #[test]
    fn test_op_msg_sequence_size() {
        let msg = OpMsg::new(2, doc! { "insert": "coll", "$db": "test" }).with_sequence(
            DocumentSequence::new("documents", vec![doc! { "_id": 1 }, doc! { "_id": 2 }]),
        );
        let bytes = msg.encode().unwrap();

        let mut body_len = Vec::new();
        put_document(&mut body_len, &msg.body).unwrap();
        let seq_start = 16 + 4 + 1 + body_len.len();
        assert_eq!(bytes[seq_start], section::SEQUENCE);
        let size = i32::from_le_bytes([
            bytes[seq_start + 1],
            bytes[seq_start + 2],
            bytes[seq_start + 3],
            bytes[seq_start + 4],
        ]) as usize;
        assert_eq!(seq_start + 1 + size, bytes.len());
    }

    #[test]
    fn test_op_query_command() {
        let query = OpQuery::command(9, "admin", doc! { "isMaster": 1 })
            .with_flags(super::super::query_flags::SECONDARY_OK);
        assert_eq!(query.full_collection_name, "admin.$cmd");
        assert_eq!(query.number_to_return, -1);

        let bytes = query.encode().unwrap();
        let parsed = OpQuery::parse(&bytes).unwrap();
        assert_eq!(parsed.request_id, 9);
        assert_eq!(parsed.flags, 4);
        assert_eq!(parsed.full_collection_name, "admin.$cmd");
        assert_eq!(parsed.number_to_skip, 0);
        assert_eq!(parsed.number_to_return, -1);
        assert_eq!(parsed.query, doc! { "isMaster": 1 });
    }

    #[test]
    fn test_command_name_through_query_wrapper() {
        let wrapped = OutboundMessage::Query(OpQuery::command(
            1,
            "db",
            doc! { "$query": { "count": "c" }, "$readPreference": { "mode": "secondary" } },
        ));
        assert_eq!(wrapped.command_name(), "count");

        let plain = OutboundMessage::Msg(OpMsg::new(2, doc! { "find": "c" }));
        assert_eq!(plain.command_name(), "find");
        assert_eq!(plain.op_code(), OpCode::Msg);
    }
}

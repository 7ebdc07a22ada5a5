//! Scripted Mock Server
//!
//! 테스트 전용. 메모리 duplex 스트림 위에서 요청을 읽고 준비된 응답을 씁니다.

use bson::{doc, Document};
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::codec::Decoder;

use super::config::ConnectionConfig;
use super::connection::Connection;
use super::description::HelloReply;
use crate::wire::{
    compress_message, decompress_message, next_request_id, Compressor, DocumentSequenceRef,
    MessageFramer, MessageHeader, OpCode, OpMsg, OpQuery, OpReply, ReplyEnvelope,
    DEFAULT_MAX_MESSAGE_SIZE,
};

const DUPLEX_CAPACITY: usize = 64 * 1024;

/// 기본 핸드셰이크 응답에 `overrides`를 덮어씀
pub(crate) fn hello(overrides: Document) -> HelloReply {
    let mut document = doc! {
        "ok": 1,
        "isWritablePrimary": true,
        "minWireVersion": 0,
        "maxWireVersion": 17,
        "maxBsonObjectSize": 16 * 1024 * 1024,
        "maxMessageSizeBytes": 48_000_000,
        "maxWriteBatchSize": 100_000,
    };
    for (key, value) in overrides {
        document.insert(key, value);
    }
    HelloReply::parse(document).expect("valid hello reply")
}

/// 서버가 받은 요청
#[derive(Debug)]
pub(crate) struct MockRequest {
    pub request_id: i32,
    /// 압축 해제 후의 opcode
    pub op_code: OpCode,
    /// OP_COMPRESSED로 도착했는지 여부
    pub compressed: bool,
    pub flags: u32,
    /// OP_MSG 본문 또는 OP_QUERY 쿼리 문서
    pub command: Document,
    /// OP_QUERY 네임스페이스
    pub full_collection_name: Option<String>,
    pub sequences: Vec<DocumentSequenceRef>,
}

/// 스크립트 서버
pub(crate) struct MockServer {
    stream: DuplexStream,
    framer: MessageFramer,
    buffer: BytesMut,
}

impl MockServer {
    /// 연결과 그 상대편 서버 생성
    pub(crate) fn pair(config: ConnectionConfig) -> (Connection, MockServer) {
        let (client, server) = tokio::io::duplex(DUPLEX_CAPACITY);
        let connection = Connection::from_stream(client, config).expect("valid config");
        let server = MockServer {
            stream: server,
            framer: MessageFramer::new(),
            buffer: BytesMut::new(),
        };
        (connection, server)
    }

    /// 다음 요청을 읽음
    pub(crate) async fn next_request(&mut self) -> MockRequest {
        loop {
            if let Some(frame) = self.framer.decode(&mut self.buffer).expect("framing") {
                return parse_request(frame);
            }
            let n = self
                .stream
                .read_buf(&mut self.buffer)
                .await
                .expect("read from client");
            assert!(n > 0, "client closed the stream");
        }
    }

    /// OP_MSG 응답 전송. 보낸 응답의 request id를 돌려줍니다.
    pub(crate) async fn send_msg(&mut self, response_to: i32, body: Document, more_to_come: bool) -> i32 {
        let request_id = next_request_id();
        let bytes = OpMsg::new(request_id, body)
            .with_response_to(response_to)
            .with_more_to_come(more_to_come)
            .encode()
            .expect("encode reply");
        self.send_raw(&bytes).await;
        request_id
    }

    /// 압축된 OP_MSG 응답 전송
    pub(crate) async fn send_compressed_msg(
        &mut self,
        response_to: i32,
        body: Document,
        compressor: Compressor,
    ) -> i32 {
        let request_id = next_request_id();
        let bytes = OpMsg::new(request_id, body)
            .with_response_to(response_to)
            .encode()
            .expect("encode reply");
        let bytes = compress_message(&bytes, compressor).expect("compress reply");
        self.send_raw(&bytes).await;
        request_id
    }

    /// OP_REPLY 응답 전송
    pub(crate) async fn send_reply(&mut self, reply: OpReply) {
        let bytes = reply.encode().expect("encode reply");
        self.send_raw(&bytes).await;
    }

    /// 임의 바이트 전송
    pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write to client");
        self.stream.flush().await.expect("flush");
    }

    /// 서버 쪽 쓰기 종료 (클라이언트는 EOF를 봄)
    pub(crate) async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    /// 클라이언트가 스트림을 놓을 때까지 대기
    pub(crate) async fn wait_closed(&mut self) -> bool {
        let mut scratch = BytesMut::new();
        loop {
            match self.stream.read_buf(&mut scratch).await {
                Ok(0) | Err(_) => return true,
                Ok(_) => scratch.clear(),
            }
        }
    }
}

fn parse_request(frame: BytesMut) -> MockRequest {
    let compressed = MessageHeader::read(&frame).expect("header").op_code == OpCode::Compressed.as_i32();
    let message = decompress_message(frame, DEFAULT_MAX_MESSAGE_SIZE).expect("decompress request");
    let header = MessageHeader::read(&message).expect("header");

    match header.op().expect("known opcode") {
        OpCode::Msg => {
            let envelope = ReplyEnvelope::parse(&message).expect("parse OP_MSG");
            let command = envelope.documents[0].to_document().expect("body document");
            MockRequest {
                request_id: header.request_id,
                op_code: OpCode::Msg,
                compressed,
                flags: envelope.flags,
                command,
                full_collection_name: None,
                sequences: envelope.sequences,
            }
        }
        OpCode::Query => {
            let query = OpQuery::parse(&message).expect("parse OP_QUERY");
            MockRequest {
                request_id: header.request_id,
                op_code: OpCode::Query,
                compressed,
                flags: query.flags as u32,
                command: query.query,
                full_collection_name: Some(query.full_collection_name),
                sequences: Vec::new(),
            }
        }
        other => panic!("unexpected request opcode {}", other),
    }
}

//! Operation Correlator
//!
//! 요청 id별 대기 중인 작업 관리와 응답 매칭

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bson::{Bson, Document, RawDocumentBuf};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::cluster_time::ClusterTime;
use super::error::{DriverError, DriverResult, ServerError, WriteConcernError};
use super::session::ClientSession;
use crate::wire::{Compressor, DecodeOptions, ReplyEnvelope};

/// 모니터링 연결의 대기 큐가 손상되었을 때의 에러 메시지
pub const INVALID_QUEUE_SIZE: &str =
    "Connection internal queue contains more than 1 operation description";

// ============================================================================
// CommandReply - 명령 응답
// ============================================================================

/// 호출자에게 전달되는 응답
#[derive(Debug, Clone, Default)]
pub struct CommandReply {
    /// 디코딩된 응답 문서 (응답 없는 명령은 `None`)
    pub document: Option<Document>,
    /// 원본 바이트 (`DecodeOptions::raw`일 때)
    pub raw: Option<RawDocumentBuf>,
    /// 이 응답의 request id
    pub request_id: i32,
    /// 응답이 가리키는 request id
    pub response_to: i32,
    /// 서버가 응답을 더 보낼지 여부
    pub more_to_come: bool,
    /// OP_REPLY 커서 id
    pub cursor_id: Option<i64>,
}

impl CommandReply {
    /// 응답 없는 명령의 완료 값
    pub fn empty(request_id: i32) -> Self {
        Self {
            request_id,
            ..Default::default()
        }
    }
}

// ============================================================================
// PendingOperation - 대기 중인 작업
// ============================================================================

/// 완료 핸들러 (exhaust 명령은 여러 번 호출됨)
pub type ReplySender = mpsc::UnboundedSender<DriverResult<CommandReply>>;

/// 응답을 기다리는 요청 하나
#[derive(Debug, Clone)]
pub struct PendingOperation {
    /// 원래 요청 id
    pub request_id: i32,
    pub command_name: String,
    pub database: String,
    pub session: Option<Arc<dyn ClientSession>>,
    pub decode: DecodeOptions,
    /// 응답을 기대하지 않는 명령
    pub no_response: bool,
    /// 전송에 쓴 압축기
    pub compressor: Option<Compressor>,
    /// 시작 시각 (이벤트 소요 시간)
    pub started_at: Instant,
    /// 명령 이벤트 발행 여부
    pub monitored: bool,
    /// 이벤트에서 본문을 숨길지 여부
    pub redacted: bool,
    handler: ReplySender,
}

impl PendingOperation {
    /// 새 작업 생성
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request_id: i32,
        command_name: impl Into<String>,
        database: impl Into<String>,
        session: Option<Arc<dyn ClientSession>>,
        decode: DecodeOptions,
        no_response: bool,
        compressor: Option<Compressor>,
        handler: ReplySender,
    ) -> Self {
        Self {
            request_id,
            command_name: command_name.into(),
            database: database.into(),
            session,
            decode,
            no_response,
            compressor,
            started_at: Instant::now(),
            monitored: false,
            redacted: false,
            handler,
        }
    }

    /// 이벤트 설정
    pub fn with_monitoring(mut self, monitored: bool, redacted: bool) -> Self {
        self.monitored = monitored;
        self.redacted = redacted;
        self
    }

    /// 핸들러 호출
    pub fn deliver(&self, result: DriverResult<CommandReply>) {
        // receiver may be gone if the caller stopped waiting
        let _ = self.handler.send(result);
    }
}

// ============================================================================
// OperationCorrelator
// ============================================================================

/// 응답 매칭 결과
#[derive(Debug)]
pub enum Match {
    /// responseTo로 찾음
    Found(PendingOperation),
    /// 모니터링 연결에서 남은 하나를 가져옴
    Orphan(PendingOperation),
    /// 받을 대상이 없음
    Unmatched,
    /// 모니터링 연결에 대기 작업이 둘 이상
    InvalidQueueSize(usize),
}

#[derive(Debug, Default)]
struct State {
    pending: HashMap<i32, PendingOperation>,
    closed: bool,
}

/// 대기 작업 맵
///
/// 연결 정리 시 [`OperationCorrelator::drain`] 이후의 삽입은 거부되므로, 정리가
/// 시작된 뒤에 추가된 작업이 영원히 대기하는 일이 없습니다.
#[derive(Debug, Default)]
pub struct OperationCorrelator {
    state: Mutex<State>,
}

impl OperationCorrelator {
    /// 빈 맵 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 작업 등록. 이미 정리된 경우 작업을 돌려줍니다.
    pub fn insert(&self, op: PendingOperation) -> Result<(), PendingOperation> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(op);
        }
        state.pending.insert(op.request_id, op);
        Ok(())
    }

    /// 다른 키로 재등록 (moreToCome)
    pub fn reinsert(&self, key: i32, op: PendingOperation) -> Result<(), PendingOperation> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(op);
        }
        state.pending.insert(key, op);
        Ok(())
    }

    /// 작업 제거
    pub fn remove(&self, key: i32) -> Option<PendingOperation> {
        self.state.lock().pending.remove(&key)
    }

    /// 응답의 responseTo로 작업을 찾아 제거
    ///
    /// 모니터링 연결에서는 responseTo가 맞지 않아도 대기 작업이 정확히 하나면
    /// 그 작업을 돌려줍니다.
    pub fn take(&self, response_to: i32, monitoring: bool) -> Match {
        let mut state = self.state.lock();
        if let Some(op) = state.pending.remove(&response_to) {
            return Match::Found(op);
        }
        if !monitoring {
            return Match::Unmatched;
        }
        match state.pending.len() {
            0 => Match::Unmatched,
            1 => {
                let key = state.pending.keys().next().copied();
                match key.and_then(|k| state.pending.remove(&k)) {
                    Some(op) => Match::Orphan(op),
                    None => Match::Unmatched,
                }
            }
            n => Match::InvalidQueueSize(n),
        }
    }

    /// 모든 작업을 꺼내고 이후 삽입을 막음
    pub fn drain(&self) -> Vec<PendingOperation> {
        let mut state = self.state.lock();
        state.closed = true;
        state.pending.drain().map(|(_, op)| op).collect()
    }

    /// 대기 작업 수
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// 비어 있는지 여부
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 키 등록 여부
    pub fn contains(&self, key: i32) -> bool {
        self.state.lock().pending.contains_key(&key)
    }
}

// ============================================================================
// Reply processing
// ============================================================================

/// 응답 처리 결과
#[derive(Debug)]
pub struct ProcessedReply {
    pub result: DriverResult<CommandReply>,
    /// 응답에 실려 온 클러스터 시간
    pub cluster_time: Option<ClusterTime>,
}

/// 응답을 작업의 디코딩 옵션으로 해석
///
/// 세션 갱신, `$clusterTime` 추출, write concern/서버 에러 분류를 합니다.
pub fn process_reply(op: &PendingOperation, envelope: &ReplyEnvelope) -> ProcessedReply {
    let document = match envelope.decode(&op.decode) {
        Ok(document) => document,
        Err(e) => {
            return ProcessedReply {
                result: Err(e.into()),
                cluster_time: None,
            }
        }
    };

    let mut cluster_time = None;
    if let Some(doc) = &document {
        if let Some(session) = &op.session {
            session.update_from_reply(doc);
        }
        cluster_time = ClusterTime::from_reply(doc);

        if doc.contains_key("writeConcernError") {
            if let Some(wce) = WriteConcernError::from_reply(doc.clone()) {
                return ProcessedReply {
                    result: Err(DriverError::WriteConcern(wce)),
                    cluster_time,
                };
            }
        }
        if envelope.query_failure() || is_error_reply(doc) {
            return ProcessedReply {
                result: Err(DriverError::Server(ServerError::from_reply(doc.clone()))),
                cluster_time,
            };
        }
    }

    let raw = if op.decode.raw {
        envelope.raw_body().cloned()
    } else {
        None
    };
    ProcessedReply {
        result: Ok(CommandReply {
            document,
            raw,
            request_id: envelope.request_id,
            response_to: envelope.response_to,
            more_to_come: envelope.more_to_come,
            cursor_id: envelope.cursor_id,
        }),
        cluster_time,
    }
}

/// `ok: 0`, `$err`, `errmsg`, `code` 중 하나라도 있으면 실패 응답
pub fn is_error_reply(doc: &Document) -> bool {
    ok_value(doc) == Some(0.0)
        || doc.contains_key("$err")
        || doc.contains_key("errmsg")
        || doc.contains_key("code")
}

/// 응답의 `ok`가 1인지 여부
pub fn reply_ok(doc: &Document) -> bool {
    ok_value(doc) == Some(1.0)
}

fn ok_value(doc: &Document) -> Option<f64> {
    match doc.get("ok")? {
        Bson::Double(v) => Some(*v),
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{OpMsg, OpReply};
    use bson::{doc, Timestamp};

    fn op(request_id: i32) -> (PendingOperation, mpsc::UnboundedReceiver<DriverResult<CommandReply>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let op = PendingOperation::new(
            request_id,
            "ping",
            "admin",
            None,
            DecodeOptions::new(),
            false,
            None,
            tx,
        );
        (op, rx)
    }

    fn envelope(response_to: i32, body: Document) -> ReplyEnvelope {
        let bytes = OpMsg::new(1000 + response_to, body)
            .with_response_to(response_to)
            .encode()
            .unwrap();
        ReplyEnvelope::parse(&bytes).unwrap()
    }

    #[test]
    fn test_match_by_response_to() {
        let correlator = OperationCorrelator::new();
        correlator.insert(op(1).0).unwrap();
        correlator.insert(op(2).0).unwrap();

        assert!(matches!(correlator.take(2, false), Match::Found(o) if o.request_id == 2));
        // already completed: dropped
        assert!(matches!(correlator.take(2, false), Match::Unmatched));
        assert_eq!(correlator.len(), 1);
        assert!(correlator.contains(1));
    }

    #[test]
    fn test_orphan_recovery_on_monitoring_connection() {
        let correlator = OperationCorrelator::new();
        correlator.insert(op(7).0).unwrap();

        // unmatched on a regular connection
        assert!(matches!(correlator.take(99, false), Match::Unmatched));
        assert_eq!(correlator.len(), 1);

        assert!(matches!(correlator.take(99, true), Match::Orphan(o) if o.request_id == 7));
        assert!(correlator.is_empty());
        assert!(matches!(correlator.take(99, true), Match::Unmatched));
    }

    #[test]
    fn test_invalid_queue_size() {
        let correlator = OperationCorrelator::new();
        correlator.insert(op(1).0).unwrap();
        correlator.insert(op(2).0).unwrap();
        assert!(matches!(correlator.take(50, true), Match::InvalidQueueSize(2)));
        // nothing removed
        assert_eq!(correlator.len(), 2);
    }

    #[test]
    fn test_drain_closes_map() {
        let correlator = OperationCorrelator::new();
        correlator.insert(op(1).0).unwrap();
        correlator.insert(op(2).0).unwrap();

        let drained = correlator.drain();
        assert_eq!(drained.len(), 2);
        assert!(correlator.is_empty());
        assert!(correlator.insert(op(3).0).is_err());
        assert!(correlator.reinsert(4, op(4).0).is_err());
    }

    #[test]
    fn test_reinsert_under_new_key() {
        let correlator = OperationCorrelator::new();
        correlator.insert(op(10).0).unwrap();
        let Match::Found(found) = correlator.take(10, false) else {
            panic!("expected match");
        };
        correlator.reinsert(500, found).unwrap();
        assert!(!correlator.contains(10));
        assert!(matches!(correlator.take(500, false), Match::Found(o) if o.request_id == 10));
    }

    #[tokio::test]
    async fn test_deliver() {
        let (op, mut rx) = op(1);
        op.deliver(Ok(CommandReply::empty(1)));
        let reply = rx.recv().await.unwrap().unwrap();
        assert!(reply.document.is_none());
        assert_eq!(reply.request_id, 1);
    }

    #[test]
    fn test_process_success() {
        let (op, _rx) = op(3);
        let processed = process_reply(
            &op,
            &envelope(
                3,
                doc! {
                    "ok": 1,
                    "$clusterTime": { "clusterTime": Timestamp { time: 5, increment: 1 }, "signature": {} },
                },
            ),
        );
        let reply = processed.result.unwrap();
        assert_eq!(reply.response_to, 3);
        assert!(reply.raw.is_none());
        assert_eq!(
            processed.cluster_time.unwrap().timestamp(),
            Timestamp { time: 5, increment: 1 }
        );
    }

    #[test]
    fn test_process_raw() {
        let (mut op, _rx) = op(3);
        op.decode = DecodeOptions::new().with_raw(true);
        let reply = process_reply(&op, &envelope(3, doc! { "ok": 1 })).result.unwrap();
        assert_eq!(reply.raw.unwrap().to_document().unwrap(), doc! { "ok": 1 });
    }

    #[test]
    fn test_process_write_concern_error() {
        let (op, _rx) = op(3);
        let processed = process_reply(
            &op,
            &envelope(
                3,
                doc! { "ok": 1, "n": 0, "writeConcernError": { "code": 100, "errmsg": "wc" } },
            ),
        );
        let err = processed.result.unwrap_err();
        assert!(matches!(err, DriverError::WriteConcern(_)));
        assert!(reply_ok(err.reply_document().unwrap()));
    }

    #[test]
    fn test_process_server_error() {
        let (op, _rx) = op(3);
        let processed = process_reply(
            &op,
            &envelope(3, doc! { "ok": 0, "errmsg": "no such command", "code": 59 }),
        );
        assert!(matches!(processed.result, Err(DriverError::Server(ref e)) if e.code == 59));
    }

    #[test]
    fn test_process_query_failure() {
        let (op, _rx) = op(3);
        let mut reply = OpReply::new(4, 3, doc! { "$err": "bad" });
        reply.response_flags = crate::wire::message::reply_flags::QUERY_FAILURE;
        let envelope = ReplyEnvelope::parse(&reply.encode().unwrap()).unwrap();
        assert!(matches!(
            process_reply(&op, &envelope).result,
            Err(DriverError::Server(_))
        ));
    }

    #[test]
    fn test_error_reply_detection() {
        assert!(is_error_reply(&doc! { "ok": 0 }));
        assert!(is_error_reply(&doc! { "ok": 0.0 }));
        assert!(is_error_reply(&doc! { "ok": 1, "code": 2 }));
        assert!(!is_error_reply(&doc! { "ok": 1 }));
        assert!(reply_ok(&doc! { "ok": 1.0 }));
        assert!(!reply_ok(&doc! { "ok": 0 }));
    }
}

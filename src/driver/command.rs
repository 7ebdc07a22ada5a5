//! Command Assembler
//!
//! 논리 명령을 전송 가능한 wire 메시지로 조립

use std::sync::Arc;
use std::time::Duration;

use bson::Document;

use super::cluster_time::ClusterTime;
use super::description::StreamDescription;
use super::error::{DriverError, DriverResult};
use super::session::{ClientSession, ReadPreference, ServerApi, WriteConcern};
use crate::wire::message::query_flags;
use crate::wire::{DecodeOptions, DocumentSequence, OpMsg, OpQuery, OutboundMessage};

// ============================================================================
// Namespace
// ============================================================================

/// `<db>` 또는 `<db>.<collection>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub db: String,
    pub collection: Option<String>,
}

impl Namespace {
    /// 문자열 파싱
    pub fn parse(ns: &str) -> DriverResult<Self> {
        let (db, collection) = match ns.split_once('.') {
            Some((db, coll)) => (db, Some(coll.to_string())),
            None => (ns, None),
        };
        if db.is_empty() {
            return Err(DriverError::configuration(format!(
                "namespace '{}' has no database",
                ns
            )));
        }
        Ok(Self {
            db: db.to_string(),
            collection,
        })
    }
}

// ============================================================================
// CommandOptions - 명령 옵션
// ============================================================================

/// 명령별 옵션
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    /// 첨부할 세션
    pub session: Option<Arc<dyn ClientSession>>,
    /// 읽기 선호도
    pub read_preference: Option<ReadPreference>,
    /// Write concern (세션 검증용)
    pub write_concern: Option<WriteConcern>,
    /// 응답을 기다리지 않음 (OP_MSG moreToCome)
    pub no_response: bool,
    /// 여러 응답 허용 (OP_MSG exhaustAllowed)
    pub exhaust_allowed: bool,
    /// 이 명령의 소켓 타임아웃 (없으면 연결 기본값)
    pub socket_timeout: Option<Duration>,
    /// 응답 디코딩 옵션
    pub decode: DecodeOptions,
    /// OP_MSG 문서 시퀀스
    pub sequences: Vec<DocumentSequence>,
}

impl CommandOptions {
    /// 기본 옵션
    pub fn new() -> Self {
        Self::default()
    }

    /// 세션 설정
    pub fn with_session(mut self, session: Arc<dyn ClientSession>) -> Self {
        self.session = Some(session);
        self
    }

    /// 읽기 선호도 설정
    pub fn with_read_preference(mut self, read_preference: ReadPreference) -> Self {
        self.read_preference = Some(read_preference);
        self
    }

    /// Write concern 설정
    pub fn with_write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = Some(write_concern);
        self
    }

    /// 응답 없는 명령으로 설정
    pub fn with_no_response(mut self) -> Self {
        self.no_response = true;
        self
    }

    /// exhaust 허용
    pub fn with_exhaust_allowed(mut self) -> Self {
        self.exhaust_allowed = true;
        self
    }

    /// 소켓 타임아웃 설정
    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    /// 디코딩 옵션 설정
    pub fn with_decode(mut self, decode: DecodeOptions) -> Self {
        self.decode = decode;
        self
    }

    /// 문서 시퀀스 추가
    pub fn with_sequence(mut self, sequence: DocumentSequence) -> Self {
        self.sequences.push(sequence);
        self
    }
}

// ============================================================================
// Assembler
// ============================================================================

/// 조립 입력 중 연결이 제공하는 값
#[derive(Debug, Clone, Copy)]
pub struct AssemblyContext<'a> {
    pub description: &'a StreamDescription,
    pub cluster_time: Option<&'a ClusterTime>,
    pub server_api: Option<&'a ServerApi>,
}

/// 조립된 명령
#[derive(Debug, Clone)]
pub struct AssembledCommand {
    /// 전송할 메시지
    pub message: OutboundMessage,
    /// 명령 이름 (첫 번째 키)
    pub command_name: String,
    /// 대상 데이터베이스
    pub database: String,
    /// 이벤트에 실을 명령 (`$query` 래퍼 제외)
    pub command: Document,
}

/// 명령 조립
///
/// 호출자의 문서는 변경하지 않습니다. 세션 호환성 에러는 아무것도 전송하기
/// 전에 반환됩니다.
pub fn assemble(
    ns: &Namespace,
    command: &Document,
    options: &CommandOptions,
    context: AssemblyContext<'_>,
    request_id: i32,
) -> DriverResult<AssembledCommand> {
    let description = context.description;
    let mut cmd = command.clone();
    let command_name = cmd
        .keys()
        .next()
        .cloned()
        .ok_or_else(|| DriverError::configuration("command document is empty"))?;

    if let Some(api) = context.server_api {
        api.apply(&mut cmd);
    }

    let mut cluster_time = context.cluster_time.cloned();
    match &options.session {
        Some(session) if description.supports_sessions() => {
            let session_time = session.cluster_time();
            if let Some(newer) = ClusterTime::max(cluster_time.as_ref(), session_time.as_ref()) {
                cluster_time = Some(newer.clone());
            }
            session.apply_to_command(&mut cmd, description, options.write_concern.as_ref())?;
        }
        Some(session) if session.is_explicit() => {
            return Err(DriverError::compatibility(
                "current topology does not support sessions",
            ));
        }
        _ => {}
    }

    if let Some(cluster_time) = &cluster_time {
        cmd.insert("$clusterTime", cluster_time.to_document());
    }

    let read_preference = options
        .read_preference
        .as_ref()
        .filter(|rp| !rp.is_primary());

    let (message, event_command) = if description.supports_op_msg() {
        cmd.insert("$db", ns.db.clone());
        let event_command = cmd.clone();
        if let Some(rp) = read_preference {
            cmd.insert("$readPreference", rp.to_document());
        }
        let mut msg = OpMsg::new(request_id, cmd)
            .with_more_to_come(options.no_response)
            .with_exhaust_allowed(options.exhaust_allowed);
        for sequence in &options.sequences {
            msg = msg.with_sequence(sequence.clone());
        }
        (OutboundMessage::Msg(msg), event_command)
    } else {
        if !options.sequences.is_empty() {
            return Err(DriverError::compatibility(
                "document sequences require OP_MSG (wire version 6)",
            ));
        }
        let event_command = cmd.clone();
        // legacy secondary reads through mongos
        let query_doc = match read_preference {
            Some(rp) if description.sharded => {
                let mut wrapped = Document::new();
                wrapped.insert("$query", cmd);
                wrapped.insert("$readPreference", rp.to_document());
                wrapped
            }
            _ => cmd,
        };
        let mut query = OpQuery::command(request_id, &ns.db, query_doc);
        if read_preference.is_some() {
            query = query.with_flags(query_flags::SECONDARY_OK);
        }
        (OutboundMessage::Query(query), event_command)
    };

    Ok(AssembledCommand {
        message,
        command_name,
        database: ns.db.clone(),
        command: event_command,
    })
}

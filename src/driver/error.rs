//! Driver Error Types
//!
//! 드라이버 에러 정의

use std::io;

use bson::{Bson, Document};
use thiserror::Error;

use crate::wire::WireError;

// ============================================================================
// DriverError - 드라이버 에러
// ============================================================================

/// 드라이버 에러
///
/// 연결 하나가 실패하면 같은 에러가 대기 중인 모든 호출자에게 전달되므로
/// `Clone`을 구현합니다.
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// 네트워크 에러 (전송 계층 종료/손상)
    #[error("Network error: {0}")]
    Network(String),

    /// 네트워크 타임아웃
    #[error("Network timeout: {message}")]
    NetworkTimeout {
        message: String,
        /// 핸드셰이크 이전에 발생했는지 여부
        before_handshake: bool,
    },

    /// 파싱 에러 (잘못된 프레임, 잘못된 메시지 길이)
    #[error("Parse error: {0}")]
    Parse(String),

    /// 문서 코덱 에러 (그대로 전달)
    #[error("{0}")]
    Document(String),

    /// 서버 에러
    #[error("Server error: {0}")]
    Server(ServerError),

    /// Write concern 에러
    #[error("Write concern error: {0}")]
    WriteConcern(WriteConcernError),

    /// 호환성 에러 (서버/세션이 지원하지 않는 기능)
    #[error("Compatibility error: {0}")]
    Compatibility(String),

    /// 필요한 하위 시스템이 구성되지 않음
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    /// 예상치 못한 응답
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 내부 에러
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DriverError {
    /// 네트워크 에러 생성
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// 네트워크 타임아웃 에러 생성
    pub fn network_timeout(msg: impl Into<String>, before_handshake: bool) -> Self {
        Self::NetworkTimeout {
            message: msg.into(),
            before_handshake,
        }
    }

    /// 파싱 에러 생성
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// 호환성 에러 생성
    pub fn compatibility(msg: impl Into<String>) -> Self {
        Self::Compatibility(msg.into())
    }

    /// 의존성 누락 에러 생성
    pub fn missing_dependency(msg: impl Into<String>) -> Self {
        Self::MissingDependency(msg.into())
    }

    /// 예상치 못한 응답 에러 생성
    pub fn unexpected_response(msg: impl Into<String>) -> Self {
        Self::UnexpectedResponse(msg.into())
    }

    /// 설정 에러 생성
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 내부 에러 생성
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// 네트워크 에러 여부 (타임아웃 포함)
    pub fn is_network_error(&self) -> bool {
        matches!(self, Self::Network(_) | Self::NetworkTimeout { .. })
    }

    /// 네트워크 타임아웃 여부
    pub fn is_network_timeout(&self) -> bool {
        matches!(self, Self::NetworkTimeout { .. })
    }

    /// 연결을 종료시키는 에러인지 여부
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::NetworkTimeout { .. } | Self::Parse(_) | Self::Internal(_)
        )
    }

    /// 서버 에러 코드
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Server(e) => Some(e.code),
            Self::WriteConcern(e) => Some(e.code),
            _ => None,
        }
    }

    /// 에러를 만든 서버 응답 문서
    pub fn reply_document(&self) -> Option<&Document> {
        match self {
            Self::Server(e) => Some(&e.reply),
            Self::WriteConcern(e) => Some(&e.reply),
            _ => None,
        }
    }

    /// 재시도 가능 여부
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::NetworkTimeout { .. } => true,
            Self::Server(e) => is_retryable_code(e.code) || e.has_label("RetryableWriteError"),
            Self::WriteConcern(e) => is_retryable_code(e.code),
            _ => false,
        }
    }
}

/// 재시도 가능한 서버 에러 코드 확인
fn is_retryable_code(code: i32) -> bool {
    matches!(
        code,
        6 | 7 | 89 | 91 | 134 | 189 | 262 | 9001 | 10107 | 11600 | 11602 | 13435 | 13436
    )
}

impl From<WireError> for DriverError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Io(e) => DriverError::Network(e.to_string()),
            WireError::Document(msg) => DriverError::Document(msg),
            e if e.is_missing_dependency() => DriverError::MissingDependency(e.to_string()),
            e => DriverError::Parse(e.to_string()),
        }
    }
}

impl From<io::Error> for DriverError {
    fn from(err: io::Error) -> Self {
        DriverError::Network(err.to_string())
    }
}

// ============================================================================
// Result Type
// ============================================================================

/// 드라이버 결과 타입
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// Server Errors - 서버 응답 에러
// ============================================================================

/// 서버가 명령 실패를 보고한 에러 (`ok: 0`, `$err`, `errmsg`, `code`)
#[derive(Debug, Clone, PartialEq)]
pub struct ServerError {
    /// 에러 코드 (없으면 0)
    pub code: i32,
    /// 에러 코드 이름
    pub code_name: Option<String>,
    /// 에러 메시지
    pub message: String,
    /// 에러 레이블
    pub labels: Vec<String>,
    /// 원본 응답 문서
    pub reply: Document,
}

impl ServerError {
    /// 응답 문서에서 생성
    pub fn from_reply(reply: Document) -> Self {
        let message = reply
            .get_str("errmsg")
            .or_else(|_| reply.get_str("$err"))
            .unwrap_or("command failed")
            .to_string();
        Self {
            code: get_code(&reply),
            code_name: reply.get_str("codeName").ok().map(str::to_string),
            message,
            labels: get_labels(&reply),
            reply,
        }
    }

    /// 레이블 포함 여부
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code_name {
            Some(name) => write!(f, "{} ({}): {}", self.code, name, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

/// 명령은 성공했지만 쓰기 확인 수준에서 실패한 에러
///
/// 응답은 여전히 `ok: 1`입니다.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteConcernError {
    /// 에러 코드
    pub code: i32,
    /// 에러 코드 이름
    pub code_name: Option<String>,
    /// 에러 메시지
    pub message: String,
    /// `errInfo` 상세 정보
    pub details: Option<Document>,
    /// 원본 응답 문서
    pub reply: Document,
}

impl WriteConcernError {
    /// `writeConcernError` 필드가 있는 응답에서 생성
    pub fn from_reply(reply: Document) -> Option<Self> {
        let wce = reply.get_document("writeConcernError").ok()?.clone();
        Some(Self {
            code: get_code(&wce),
            code_name: wce.get_str("codeName").ok().map(str::to_string),
            message: wce.get_str("errmsg").unwrap_or("write concern error").to_string(),
            details: wce.get_document("errInfo").ok().cloned(),
            reply,
        })
    }
}

impl std::fmt::Display for WriteConcernError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// 숫자 필드를 i64로 읽기 (Int32/Int64/Double 모두 허용)
pub(crate) fn get_number(doc: &Document, key: &str) -> Option<i64> {
    match doc.get(key)? {
        Bson::Int32(v) => Some(*v as i64),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) => Some(*v as i64),
        _ => None,
    }
}

fn get_code(doc: &Document) -> i32 {
    get_number(doc, "code").unwrap_or(0) as i32
}

fn get_labels(doc: &Document) -> Vec<String> {
    doc.get_array("errorLabels")
        .map(|labels| {
            labels
                .iter()
                .filter_map(|l| l.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::network("connection 1 to localhost:27017 closed");
        assert_eq!(
            err.to_string(),
            "Network error: connection 1 to localhost:27017 closed"
        );

        let err = DriverError::network_timeout("connection 2 to db:27017 timed out", true);
        assert!(err.is_network_timeout());
        assert!(err.is_network_error());
        assert!(matches!(
            err,
            DriverError::NetworkTimeout {
                before_handshake: true,
                ..
            }
        ));
    }

    #[test]
    fn test_server_error_from_reply() {
        let err = ServerError::from_reply(doc! {
            "ok": 0,
            "errmsg": "not primary",
            "code": 10107,
            "codeName": "NotWritablePrimary",
            "errorLabels": ["RetryableWriteError"],
        });
        assert_eq!(err.code, 10107);
        assert_eq!(err.code_name.as_deref(), Some("NotWritablePrimary"));
        assert_eq!(err.message, "not primary");
        assert!(err.has_label("RetryableWriteError"));
        assert!(DriverError::Server(err).is_retryable());
    }

    #[test]
    fn test_legacy_err_field() {
        let err = ServerError::from_reply(doc! { "$err": "bad query", "code": 2.0 });
        assert_eq!(err.message, "bad query");
        assert_eq!(err.code, 2);
    }

    #[test]
    fn test_write_concern_error_from_reply() {
        let reply = doc! {
            "ok": 1,
            "n": 1,
            "writeConcernError": { "code": 64, "codeName": "WriteConcernFailed", "errmsg": "waiting for replication timed out", "errInfo": { "wtimeout": true } },
        };
        let err = WriteConcernError::from_reply(reply.clone()).unwrap();
        assert_eq!(err.code, 64);
        assert_eq!(err.details, Some(doc! { "wtimeout": true }));
        assert_eq!(err.reply, reply);

        assert!(WriteConcernError::from_reply(doc! { "ok": 1 }).is_none());

        let err = DriverError::WriteConcern(err);
        assert_eq!(err.code(), Some(64));
        assert_eq!(err.reply_document().unwrap().get_i32("ok").unwrap(), 1);
        assert!(!err.is_connection_fatal());
    }

    #[test]
    fn test_wire_error_conversion() {
        let err: DriverError = WireError::InvalidMessageSize { size: -1, max: 10 }.into();
        assert!(matches!(err, DriverError::Parse(_)));
        assert!(err.is_connection_fatal());

        let err: DriverError = WireError::CompressorUnavailable("snappy").into();
        assert!(matches!(err, DriverError::MissingDependency(_)));

        let err: DriverError = WireError::Document("invalid utf-8".to_string()).into();
        assert_eq!(err.to_string(), "invalid utf-8");
    }

    #[test]
    fn test_retryable() {
        assert!(DriverError::network("reset").is_retryable());
        assert!(!DriverError::compatibility("sessions").is_retryable());
        assert!(!DriverError::Server(ServerError::from_reply(doc! { "ok": 0, "code": 11000 }))
            .is_retryable());
    }
}

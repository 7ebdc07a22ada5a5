//! Session & Command Options
//!
//! 명령에 첨부되는 협력 객체: 세션, 읽기 선호도, 서버 API, write concern

use std::fmt;

use bson::{doc, Bson, Document, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::cluster_time::ClusterTime;
use super::description::StreamDescription;
use super::error::{DriverError, DriverResult};

// ============================================================================
// ClientSession - 세션 인터페이스
// ============================================================================

/// 명령에 첨부되는 논리 세션
///
/// 연결은 세션 내부 구조를 모르고 이 인터페이스만 사용합니다.
pub trait ClientSession: fmt::Debug + Send + Sync {
    /// 호출자가 명시적으로 시작한 세션인지 여부
    fn is_explicit(&self) -> bool;

    /// 세션이 알고 있는 클러스터 시간
    fn cluster_time(&self) -> Option<ClusterTime>;

    /// 클러스터 시간 전진
    fn advance_cluster_time(&self, cluster_time: &ClusterTime);

    /// 세션 필드(lsid, txnNumber, readConcern 등)를 명령에 적용
    fn apply_to_command(
        &self,
        command: &mut Document,
        description: &StreamDescription,
        write_concern: Option<&WriteConcern>,
    ) -> DriverResult<()>;

    /// 응답으로 세션 상태 갱신
    fn update_from_reply(&self, reply: &Document);
}

/// 명령 중 읽기로 분류되어 인과적 일관성 readConcern을 받는 명령
const READ_COMMANDS: [&str; 5] = ["find", "aggregate", "count", "distinct", "geoNear"];

#[derive(Debug, Default)]
struct SessionState {
    cluster_time: Option<ClusterTime>,
    operation_time: Option<Timestamp>,
    txn_number: Option<i64>,
    ended: bool,
}

/// 기본 세션 구현
#[derive(Debug)]
pub struct SimpleSession {
    lsid: Document,
    explicit: bool,
    causal_consistency: bool,
    state: Mutex<SessionState>,
}

impl SimpleSession {
    /// 새 세션 (UUID 기반 lsid)
    pub fn new(explicit: bool) -> Self {
        Self {
            lsid: doc! { "id": bson::Uuid::new() },
            explicit,
            causal_consistency: explicit,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// 인과적 일관성 설정
    pub fn with_causal_consistency(mut self, enabled: bool) -> Self {
        self.causal_consistency = enabled;
        self
    }

    /// 세션 id
    pub fn lsid(&self) -> &Document {
        &self.lsid
    }

    /// 마지막 operationTime
    pub fn operation_time(&self) -> Option<Timestamp> {
        self.state.lock().operation_time
    }

    /// 재시도 가능한 쓰기를 위한 트랜잭션 번호 증가
    pub fn increment_txn_number(&self) -> i64 {
        let mut state = self.state.lock();
        let next = state.txn_number.unwrap_or(0) + 1;
        state.txn_number = Some(next);
        next
    }

    /// 세션 종료
    pub fn end(&self) {
        self.state.lock().ended = true;
    }

    /// 종료 여부
    pub fn has_ended(&self) -> bool {
        self.state.lock().ended
    }
}

impl ClientSession for SimpleSession {
    fn is_explicit(&self) -> bool {
        self.explicit
    }

    fn cluster_time(&self) -> Option<ClusterTime> {
        self.state.lock().cluster_time.clone()
    }

    fn advance_cluster_time(&self, cluster_time: &ClusterTime) {
        let mut state = self.state.lock();
        let newer = match &state.cluster_time {
            Some(current) => cluster_time > current,
            None => true,
        };
        if newer {
            state.cluster_time = Some(cluster_time.clone());
        }
    }

    fn apply_to_command(
        &self,
        command: &mut Document,
        _description: &StreamDescription,
        write_concern: Option<&WriteConcern>,
    ) -> DriverResult<()> {
        let state = self.state.lock();
        if state.ended {
            return Err(DriverError::compatibility(
                "cannot use a session that has ended",
            ));
        }
        if self.explicit && write_concern.map_or(false, |wc| !wc.is_acknowledged()) {
            return Err(DriverError::compatibility(
                "cannot have explicit session with unacknowledged writes",
            ));
        }

        command.insert("lsid", self.lsid.clone());
        if let Some(txn_number) = state.txn_number {
            command.insert("txnNumber", txn_number);
        }

        let command_name = command.keys().next().cloned().unwrap_or_default();
        if self.causal_consistency && READ_COMMANDS.contains(&command_name.as_str()) {
            if let Some(operation_time) = state.operation_time {
                let mut read_concern = command
                    .get_document("readConcern")
                    .ok()
                    .cloned()
                    .unwrap_or_default();
                read_concern.insert("afterClusterTime", operation_time);
                command.insert("readConcern", read_concern);
            }
        }
        Ok(())
    }

    fn update_from_reply(&self, reply: &Document) {
        if let Ok(operation_time) = reply.get_timestamp("operationTime") {
            self.state.lock().operation_time = Some(operation_time);
        }
        if let Some(cluster_time) = ClusterTime::from_reply(reply) {
            self.advance_cluster_time(&cluster_time);
        }
    }
}

// ============================================================================
// ReadPreference - 읽기 선호도
// ============================================================================

/// 읽기 선호 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadPreferenceMode {
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl ReadPreferenceMode {
    /// 서버에 보내는 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadPreferenceMode::Primary => "primary",
            ReadPreferenceMode::PrimaryPreferred => "primaryPreferred",
            ReadPreferenceMode::Secondary => "secondary",
            ReadPreferenceMode::SecondaryPreferred => "secondaryPreferred",
            ReadPreferenceMode::Nearest => "nearest",
        }
    }
}

/// 읽기 선호도
#[derive(Debug, Clone, PartialEq)]
pub struct ReadPreference {
    pub mode: ReadPreferenceMode,
    pub tag_sets: Vec<Document>,
    pub max_staleness_seconds: Option<i64>,
}

impl ReadPreference {
    /// 지정 모드
    pub fn new(mode: ReadPreferenceMode) -> Self {
        Self {
            mode,
            tag_sets: Vec::new(),
            max_staleness_seconds: None,
        }
    }

    /// primary
    pub fn primary() -> Self {
        Self::new(ReadPreferenceMode::Primary)
    }

    /// secondary
    pub fn secondary() -> Self {
        Self::new(ReadPreferenceMode::Secondary)
    }

    /// 태그 셋 추가
    pub fn with_tag_set(mut self, tags: Document) -> Self {
        self.tag_sets.push(tags);
        self
    }

    /// 최대 지연 설정
    pub fn with_max_staleness_seconds(mut self, seconds: i64) -> Self {
        self.max_staleness_seconds = Some(seconds);
        self
    }

    /// primary 모드 여부
    pub fn is_primary(&self) -> bool {
        self.mode == ReadPreferenceMode::Primary
    }

    /// primary가 아닌 멤버에서 읽어도 되는지 (OP_QUERY secondaryOk 플래그)
    pub fn secondary_ok(&self) -> bool {
        !self.is_primary()
    }

    /// `$readPreference` 문서
    pub fn to_document(&self) -> Document {
        let mut doc = doc! { "mode": self.mode.as_str() };
        if !self.tag_sets.is_empty() {
            let tags: Vec<Bson> = self.tag_sets.iter().cloned().map(Bson::Document).collect();
            doc.insert("tags", tags);
        }
        if let Some(seconds) = self.max_staleness_seconds {
            doc.insert("maxStalenessSeconds", seconds);
        }
        doc
    }
}

impl Default for ReadPreference {
    fn default() -> Self {
        Self::primary()
    }
}

// ============================================================================
// ServerApi / WriteConcern
// ============================================================================

/// 서버 API 버전 선언
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerApi {
    /// API 버전 (현재 "1")
    pub version: String,
    #[serde(default)]
    pub strict: Option<bool>,
    #[serde(default)]
    pub deprecation_errors: Option<bool>,
}

impl ServerApi {
    /// 버전 1
    pub fn v1() -> Self {
        Self {
            version: "1".to_string(),
            strict: None,
            deprecation_errors: None,
        }
    }

    /// strict 설정
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    /// deprecationErrors 설정
    pub fn deprecation_errors(mut self, enabled: bool) -> Self {
        self.deprecation_errors = Some(enabled);
        self
    }

    /// 명령에 API 필드 적용
    pub fn apply(&self, command: &mut Document) {
        command.insert("apiVersion", self.version.clone());
        if let Some(strict) = self.strict {
            command.insert("apiStrict", strict);
        }
        if let Some(deprecation_errors) = self.deprecation_errors {
            command.insert("apiDeprecationErrors", deprecation_errors);
        }
    }
}

/// Write concern
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteConcern {
    /// `w` 값 (숫자 또는 "majority")
    pub w: Option<Bson>,
    pub journal: Option<bool>,
    pub w_timeout_ms: Option<i64>,
}

impl WriteConcern {
    /// 확인하지 않는 쓰기 (`w: 0`)
    pub fn unacknowledged() -> Self {
        Self {
            w: Some(Bson::Int32(0)),
            ..Default::default()
        }
    }

    /// majority
    pub fn majority() -> Self {
        Self {
            w: Some(Bson::String("majority".to_string())),
            ..Default::default()
        }
    }

    /// 확인된 쓰기인지 여부
    pub fn is_acknowledged(&self) -> bool {
        let zero = matches!(self.w, Some(Bson::Int32(0)) | Some(Bson::Int64(0)));
        !zero || self.journal == Some(true)
    }

    /// `writeConcern` 문서
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        if let Some(w) = &self.w {
            doc.insert("w", w.clone());
        }
        if let Some(j) = self.journal {
            doc.insert("j", j);
        }
        if let Some(wtimeout) = self.w_timeout_ms {
            doc.insert("wtimeout", wtimeout);
        }
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::config::ConnectionConfig;

    fn description() -> StreamDescription {
        StreamDescription::initial(&ConnectionConfig::default())
    }

    #[test]
    fn test_apply_session_fields() {
        let session = SimpleSession::new(true);
        session.increment_txn_number();

        let mut command = doc! { "insert": "coll" };
        session
            .apply_to_command(&mut command, &description(), None)
            .unwrap();

        assert_eq!(command.get_document("lsid").unwrap(), session.lsid());
        assert_eq!(command.get_i64("txnNumber").unwrap(), 1);
    }

    #[test]
    fn test_causal_read_concern() {
        let session = SimpleSession::new(true);
        session.update_from_reply(&doc! {
            "ok": 1,
            "operationTime": Timestamp { time: 50, increment: 1 },
        });

        let mut find = doc! { "find": "coll", "readConcern": { "level": "majority" } };
        session.apply_to_command(&mut find, &description(), None).unwrap();
        let rc = find.get_document("readConcern").unwrap();
        assert_eq!(rc.get_str("level").unwrap(), "majority");
        assert_eq!(
            rc.get_timestamp("afterClusterTime").unwrap(),
            Timestamp { time: 50, increment: 1 }
        );

        let mut insert = doc! { "insert": "coll" };
        session.apply_to_command(&mut insert, &description(), None).unwrap();
        assert!(!insert.contains_key("readConcern"));
    }

    #[test]
    fn test_explicit_session_unacknowledged_write() {
        let session = SimpleSession::new(true);
        let mut command = doc! { "insert": "coll" };
        let err = session
            .apply_to_command(
                &mut command,
                &description(),
                Some(&WriteConcern::unacknowledged()),
            )
            .unwrap_err();
        assert!(matches!(err, DriverError::Compatibility(_)));

        let implicit = SimpleSession::new(false);
        assert!(implicit
            .apply_to_command(
                &mut command,
                &description(),
                Some(&WriteConcern::unacknowledged())
            )
            .is_ok());
    }

    #[test]
    fn test_ended_session() {
        let session = SimpleSession::new(false);
        session.end();
        assert!(session.has_ended());
        let mut command = doc! { "ping": 1 };
        assert!(session
            .apply_to_command(&mut command, &description(), None)
            .is_err());
    }

    #[test]
    fn test_session_cluster_time_only_advances() {
        let session = SimpleSession::new(false);
        let later = ClusterTime::new(Timestamp { time: 9, increment: 0 });
        let earlier = ClusterTime::new(Timestamp { time: 3, increment: 0 });
        session.advance_cluster_time(&later);
        session.advance_cluster_time(&earlier);
        assert_eq!(session.cluster_time(), Some(later));
    }

    #[test]
    fn test_read_preference_document() {
        let rp = ReadPreference::secondary()
            .with_tag_set(doc! { "dc": "east" })
            .with_max_staleness_seconds(120);
        assert!(rp.secondary_ok());
        assert_eq!(
            rp.to_document(),
            doc! { "mode": "secondary", "tags": [{ "dc": "east" }], "maxStalenessSeconds": 120i64 }
        );
        assert!(!ReadPreference::default().secondary_ok());
    }

    #[test]
    fn test_server_api_fields() {
        let mut command = doc! { "ping": 1 };
        ServerApi::v1().strict(true).apply(&mut command);
        assert_eq!(command.get_str("apiVersion").unwrap(), "1");
        assert!(command.get_bool("apiStrict").unwrap());
        assert!(!command.contains_key("apiDeprecationErrors"));
    }

    #[test]
    fn test_write_concern() {
        assert!(!WriteConcern::unacknowledged().is_acknowledged());
        assert!(WriteConcern::majority().is_acknowledged());
        assert!(WriteConcern::default().is_acknowledged());
        assert_eq!(WriteConcern::majority().to_document(), doc! { "w": "majority" });
    }
}

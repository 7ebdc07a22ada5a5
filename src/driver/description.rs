//! Stream Description
//!
//! 핸드셰이크 응답(`hello`)과 그로부터 고정되는 서버 기능 스냅샷

use std::time::Duration;

use bson::oid::ObjectId;
use bson::Document;

use super::config::ConnectionConfig;
use super::error::{get_number, DriverError, DriverResult};
use crate::wire::Compressor;

/// OP_MSG를 지원하는 최소 wire 버전
pub const MIN_OP_MSG_WIRE_VERSION: i32 = 6;

const DEFAULT_MAX_BSON_OBJECT_SIZE: i64 = 16 * 1024 * 1024;
const DEFAULT_MAX_MESSAGE_SIZE_BYTES: i64 = 48_000_000;
const DEFAULT_MAX_WRITE_BATCH_SIZE: i64 = 100_000;

// ============================================================================
// HelloReply - 핸드셰이크 응답
// ============================================================================

/// 핸드셰이크 응답
#[derive(Debug, Clone, PartialEq)]
pub struct HelloReply {
    /// 원본 응답 문서
    pub document: Document,
    /// 쓰기 가능한 primary 여부
    pub is_writable_primary: bool,
    pub min_wire_version: i32,
    pub max_wire_version: i32,
    pub max_bson_object_size: i64,
    pub max_message_size_bytes: i64,
    pub max_write_batch_size: i64,
    /// 세션 타임아웃 (없으면 세션 미지원)
    pub logical_session_timeout_minutes: Option<i64>,
    /// 서버가 수락한 압축기 이름
    pub compression: Vec<String>,
    /// `isdbgrid`이면 mongos
    pub msg: Option<String>,
    pub set_name: Option<String>,
    /// 로드밸런서 뒤의 서비스 id
    pub service_id: Option<ObjectId>,
    pub hello_ok: bool,
    pub topology_version: Option<Document>,
    pub speculative_authenticate: Option<Document>,
}

impl HelloReply {
    /// 응답 문서 파싱
    pub fn parse(document: Document) -> DriverResult<Self> {
        let ok = get_number(&document, "ok").unwrap_or(0);
        if ok != 1 {
            return Err(DriverError::unexpected_response(
                "handshake reply does not report ok: 1",
            ));
        }

        let is_writable_primary = document
            .get_bool("isWritablePrimary")
            .or_else(|_| document.get_bool("ismaster"))
            .unwrap_or(false);
        let compression = document
            .get_array("compression")
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            is_writable_primary,
            min_wire_version: get_number(&document, "minWireVersion").unwrap_or(0) as i32,
            max_wire_version: get_number(&document, "maxWireVersion").unwrap_or(0) as i32,
            max_bson_object_size: get_number(&document, "maxBsonObjectSize")
                .unwrap_or(DEFAULT_MAX_BSON_OBJECT_SIZE),
            max_message_size_bytes: get_number(&document, "maxMessageSizeBytes")
                .unwrap_or(DEFAULT_MAX_MESSAGE_SIZE_BYTES),
            max_write_batch_size: get_number(&document, "maxWriteBatchSize")
                .unwrap_or(DEFAULT_MAX_WRITE_BATCH_SIZE),
            logical_session_timeout_minutes: get_number(&document, "logicalSessionTimeoutMinutes"),
            compression,
            msg: document.get_str("msg").ok().map(str::to_string),
            set_name: document.get_str("setName").ok().map(str::to_string),
            service_id: document.get_object_id("serviceId").ok(),
            hello_ok: document.get_bool("helloOk").unwrap_or(false),
            topology_version: document.get_document("topologyVersion").ok().cloned(),
            speculative_authenticate: document
                .get_document("speculativeAuthenticate")
                .ok()
                .cloned(),
            document,
        })
    }

    /// mongos 여부
    pub fn is_sharded(&self) -> bool {
        self.msg.as_deref() == Some("isdbgrid")
    }
}

// ============================================================================
// StreamDescription - 서버 기능 스냅샷
// ============================================================================

/// 연결별로 협상된 서버 기능
///
/// 핸드셰이크 전에는 [`StreamDescription::initial`] 값을 쓰고, 핸드셰이크
/// 응답이 기록되면 한 번 고정된 뒤 바뀌지 않습니다.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescription {
    pub address: String,
    pub min_wire_version: i32,
    pub max_wire_version: i32,
    pub max_bson_object_size: i64,
    pub max_message_size_bytes: i64,
    pub max_write_batch_size: i64,
    /// 합의된 압축기
    pub compressor: Option<Compressor>,
    pub logical_session_timeout: Option<Duration>,
    /// sharded 클러스터 여부
    pub sharded: bool,
    pub load_balanced: bool,
    pub service_id: Option<ObjectId>,
    pub hello_ok: bool,
}

impl StreamDescription {
    /// 핸드셰이크 전 기본값
    pub fn initial(config: &ConnectionConfig) -> Self {
        Self {
            address: config.address.clone(),
            min_wire_version: 0,
            max_wire_version: 0,
            max_bson_object_size: DEFAULT_MAX_BSON_OBJECT_SIZE,
            max_message_size_bytes: config.max_message_size as i64,
            max_write_batch_size: DEFAULT_MAX_WRITE_BATCH_SIZE,
            compressor: None,
            logical_session_timeout: None,
            sharded: false,
            load_balanced: config.load_balanced,
            service_id: None,
            hello_ok: false,
        }
    }

    /// 핸드셰이크 응답에서 생성
    ///
    /// 압축기는 클라이언트가 광고한 순서가 아니라 서버 응답의 순서대로,
    /// 광고했고 이 빌드가 지원하는 첫 번째 항목을 고릅니다.
    pub fn from_hello(hello: &HelloReply, config: &ConnectionConfig) -> Self {
        let compressor = hello
            .compression
            .iter()
            .filter(|name| config.compressors.iter().any(|c| c == *name))
            .find_map(|name| Compressor::from_name(name, config.zlib_compression_level));

        Self {
            address: config.address.clone(),
            min_wire_version: hello.min_wire_version,
            max_wire_version: hello.max_wire_version,
            max_bson_object_size: hello.max_bson_object_size,
            max_message_size_bytes: hello.max_message_size_bytes,
            max_write_batch_size: hello.max_write_batch_size,
            compressor,
            logical_session_timeout: hello
                .logical_session_timeout_minutes
                .map(|m| Duration::from_secs(m.max(0) as u64 * 60)),
            sharded: hello.is_sharded(),
            load_balanced: config.load_balanced,
            service_id: hello.service_id,
            hello_ok: hello.hello_ok,
        }
    }

    /// OP_MSG 지원 여부
    pub fn supports_op_msg(&self) -> bool {
        self.max_wire_version >= MIN_OP_MSG_WIRE_VERSION
    }

    /// 세션 지원 여부
    pub fn supports_sessions(&self) -> bool {
        self.logical_session_timeout.is_some() || self.load_balanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn hello_doc() -> Document {
        doc! {
            "isWritablePrimary": true,
            "minWireVersion": 0,
            "maxWireVersion": 17,
            "maxBsonObjectSize": 16777216,
            "maxMessageSizeBytes": 48000000,
            "maxWriteBatchSize": 100000i64,
            "logicalSessionTimeoutMinutes": 30,
            "compression": ["snappy", "zstd", "zlib"],
            "ok": 1.0,
        }
    }

    #[test]
    fn test_parse_hello() {
        let hello = HelloReply::parse(hello_doc()).unwrap();
        assert!(hello.is_writable_primary);
        assert_eq!(hello.max_wire_version, 17);
        assert_eq!(hello.max_write_batch_size, 100_000);
        assert_eq!(hello.logical_session_timeout_minutes, Some(30));
        assert_eq!(hello.compression, vec!["snappy", "zstd", "zlib"]);
        assert!(!hello.is_sharded());
    }

    #[test]
    fn test_parse_legacy_hello() {
        let hello = HelloReply::parse(doc! {
            "ismaster": true,
            "msg": "isdbgrid",
            "maxWireVersion": 5,
            "ok": 1,
        })
        .unwrap();
        assert!(hello.is_writable_primary);
        assert!(hello.is_sharded());
        assert!(HelloReply::parse(doc! { "ok": 0 }).is_err());
    }

    #[test]
    fn test_description_from_hello() {
        let config = ConnectionConfig::builder("db:27017")
            .compressors(["zlib", "zstd"])
            .build()
            .unwrap();
        let hello = HelloReply::parse(hello_doc()).unwrap();
        let description = StreamDescription::from_hello(&hello, &config);

        // snappy is not advertised; zstd comes first in the server's list
        assert_eq!(
            description.compressor,
            Some(Compressor::Zstd { level: crate::wire::compression::DEFAULT_ZSTD_LEVEL })
        );
        assert!(description.supports_op_msg());
        assert!(description.supports_sessions());
        assert_eq!(
            description.logical_session_timeout,
            Some(Duration::from_secs(1800))
        );
    }

    #[test]
    fn test_initial_description() {
        let config = ConnectionConfig::builder("db:27017")
            .load_balanced(true)
            .build()
            .unwrap();
        let description = StreamDescription::initial(&config);
        assert_eq!(description.max_wire_version, 0);
        assert!(!description.supports_op_msg());
        assert!(description.compressor.is_none());
        // load balanced connections are session capable
        assert!(description.supports_sessions());
    }

    #[test]
    fn test_no_common_compressor() {
        let config = ConnectionConfig::builder("db:27017")
            .compressors(["snappy"])
            .build()
            .unwrap();
        let hello = HelloReply::parse(hello_doc()).unwrap();
        assert!(StreamDescription::from_hello(&hello, &config).compressor.is_none());
    }
}

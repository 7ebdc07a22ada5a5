//! Connection Configuration
//!
//! 연결 설정

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{DriverError, DriverResult};
use super::session::ServerApi;
use crate::wire::DEFAULT_MAX_MESSAGE_SIZE;

// ============================================================================
// ConnectionId - 연결 식별자
// ============================================================================

/// 연결 식별자
///
/// 모니터링 전용 연결은 숫자 대신 `<monitor>`로 표시됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionId {
    /// 풀이 부여한 번호
    Numeric(u64),
    /// 모니터링 연결
    Monitor,
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionId::Numeric(id) => write!(f, "{}", id),
            ConnectionId::Monitor => f.write_str("<monitor>"),
        }
    }
}

// ============================================================================
// ConnectionConfig - 연결 설정
// ============================================================================

/// 연결 설정
///
/// # 필드
///
/// | 필드 | 기본값 | 설명 |
/// |------|--------|------|
/// | `id` | 0 | 연결 번호 |
/// | `generation` | 0 | 풀 세대 번호 |
/// | `address` | localhost:27017 | 서버 주소 |
/// | `socket_timeout` | 0 (사용 안 함) | 명령별 소켓 타임아웃 기본값 |
/// | `connect_timeout` | 30초 | TCP 연결 타임아웃 |
/// | `monitor_commands` | false | 명령 이벤트 발행 |
/// | `monitoring` | false | 모니터링 전용 연결 |
/// | `load_balanced` | false | 로드밸런서 뒤의 연결 |
/// | `compressors` | [] | 광고할 압축기 이름 |
/// | `max_message_size` | 64 MiB | 핸드셰이크 전 최대 메시지 크기 |
/// | `event_channel_size` | 256 | 이벤트 채널 용량 |
///
/// # 예시
///
/// ```rust,ignore
/// use docdb_driver::driver::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig::builder("db1.example.com:27017")
///     .id(7)
///     .socket_timeout(Duration::from_secs(30))
///     .compressors(["zstd", "zlib"])
///     .build()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// 연결 번호
    pub id: u64,
    /// 풀 세대 번호 (생성 후 불변)
    pub generation: u32,
    /// 서버 주소 (`host:port`)
    pub address: String,
    /// 소켓 타임아웃 (0 = 사용 안 함)
    #[serde(with = "humantime_serde")]
    pub socket_timeout: Duration,
    /// 연결 타임아웃
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// 명령 모니터링 이벤트 발행 여부
    pub monitor_commands: bool,
    /// 모니터링 전용 연결 여부
    pub monitoring: bool,
    /// 로드밸런서 연결 여부
    pub load_balanced: bool,
    /// 서버 API 버전
    pub server_api: Option<ServerApi>,
    /// 핸드셰이크에서 광고할 압축기
    pub compressors: Vec<String>,
    /// zlib 압축 레벨 (-1..=9)
    pub zlib_compression_level: Option<i32>,
    /// 핸드셰이크 전 최대 메시지 크기
    pub max_message_size: usize,
    /// 이벤트 채널 용량
    pub event_channel_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            id: 0,
            generation: 0,
            address: "localhost:27017".to_string(),
            socket_timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(30),
            monitor_commands: false,
            monitoring: false,
            load_balanced: false,
            server_api: None,
            compressors: Vec::new(),
            zlib_compression_level: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            event_channel_size: 256,
        }
    }
}

impl ConnectionConfig {
    /// 빌더 패턴으로 연결 설정 생성
    pub fn builder(address: impl Into<String>) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: ConnectionConfig {
                address: address.into(),
                ..Default::default()
            },
        }
    }

    /// 연결 식별자
    pub fn connection_id(&self) -> ConnectionId {
        if self.monitoring {
            ConnectionId::Monitor
        } else {
            ConnectionId::Numeric(self.id)
        }
    }

    /// 설정 검증
    pub fn validate(&self) -> DriverResult<()> {
        if self.address.is_empty() {
            return Err(DriverError::configuration("address must not be empty"));
        }
        if let Some(level) = self.zlib_compression_level {
            if !(-1..=9).contains(&level) {
                return Err(DriverError::configuration(format!(
                    "zlib compression level {} is outside -1..=9",
                    level
                )));
            }
        }
        for name in &self.compressors {
            if !matches!(name.as_str(), "noop" | "snappy" | "zlib" | "zstd") {
                return Err(DriverError::configuration(format!(
                    "unknown compressor '{}'",
                    name
                )));
            }
        }
        if self.max_message_size < crate::wire::HEADER_SIZE {
            return Err(DriverError::configuration(format!(
                "max message size {} is smaller than a message header",
                self.max_message_size
            )));
        }
        if self.event_channel_size == 0 {
            return Err(DriverError::configuration(
                "event channel size must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// 연결 설정 빌더
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// 연결 번호 설정
    pub fn id(mut self, id: u64) -> Self {
        self.config.id = id;
        self
    }

    /// 세대 번호 설정
    pub fn generation(mut self, generation: u32) -> Self {
        self.config.generation = generation;
        self
    }

    /// 소켓 타임아웃 설정
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.config.socket_timeout = timeout;
        self
    }

    /// 연결 타임아웃 설정
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// 명령 모니터링 활성화
    pub fn monitor_commands(mut self, enabled: bool) -> Self {
        self.config.monitor_commands = enabled;
        self
    }

    /// 모니터링 전용 연결로 설정
    pub fn monitoring(mut self, monitoring: bool) -> Self {
        self.config.monitoring = monitoring;
        self
    }

    /// 로드밸런서 연결로 설정
    pub fn load_balanced(mut self, load_balanced: bool) -> Self {
        self.config.load_balanced = load_balanced;
        self
    }

    /// 서버 API 설정
    pub fn server_api(mut self, api: ServerApi) -> Self {
        self.config.server_api = Some(api);
        self
    }

    /// 압축기 목록 설정
    pub fn compressors<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.compressors = names.into_iter().map(Into::into).collect();
        self
    }

    /// zlib 압축 레벨 설정
    pub fn zlib_compression_level(mut self, level: i32) -> Self {
        self.config.zlib_compression_level = Some(level);
        self
    }

    /// 최대 메시지 크기 설정
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// 이벤트 채널 용량 설정
    pub fn event_channel_size(mut self, size: usize) -> Self {
        self.config.event_channel_size = size;
        self
    }

    /// 설정 빌드
    pub fn build(self) -> DriverResult<ConnectionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.socket_timeout, Duration::ZERO);
        assert_eq!(config.max_message_size, 64 * 1024 * 1024);
        assert!(!config.monitoring);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ConnectionConfig::builder("db1:27017")
            .id(9)
            .generation(3)
            .socket_timeout(Duration::from_secs(5))
            .compressors(["zstd", "zlib"])
            .zlib_compression_level(6)
            .monitor_commands(true)
            .build()
            .unwrap();

        assert_eq!(config.address, "db1:27017");
        assert_eq!(config.connection_id(), ConnectionId::Numeric(9));
        assert_eq!(config.generation, 3);
        assert_eq!(config.compressors, vec!["zstd", "zlib"]);
    }

    #[test]
    fn test_builder_rejects_bad_values() {
        assert!(ConnectionConfig::builder("").build().is_err());
        assert!(ConnectionConfig::builder("a:1")
            .zlib_compression_level(12)
            .build()
            .is_err());
        assert!(ConnectionConfig::builder("a:1")
            .compressors(["lz4"])
            .build()
            .is_err());
        assert!(ConnectionConfig::builder("a:1")
            .event_channel_size(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_monitor_id_display() {
        let config = ConnectionConfig::builder("a:1").monitoring(true).build().unwrap();
        assert_eq!(config.connection_id(), ConnectionId::Monitor);
        assert_eq!(config.connection_id().to_string(), "<monitor>");
        assert_eq!(ConnectionId::Numeric(12).to_string(), "12");
    }

    #[test]
    fn test_deserialize_humantime() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{
                "address": "db2:27018",
                "socketTimeout": "10s",
                "connectTimeout": "500ms",
                "compressors": ["zlib"],
                "serverApi": { "version": "1", "strict": true }
            }"#,
        )
        .unwrap();
        assert_eq!(config.address, "db2:27018");
        assert_eq!(config.socket_timeout, Duration::from_secs(10));
        assert_eq!(config.connect_timeout, Duration::from_millis(500));
        assert_eq!(config.server_api.unwrap().strict, Some(true));
        assert_eq!(config.event_channel_size, 256);
    }
}

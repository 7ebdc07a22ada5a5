//! Connection Events
//!
//! 연결별 이벤트 발행/구독 채널

use std::time::Duration;

use bson::oid::ObjectId;
use bson::Document;
use tokio::sync::broadcast;

use super::cluster_time::ClusterTime;
use super::config::ConnectionId;
use super::error::DriverError;

/// 모니터링에서 내용을 숨겨야 하는 명령
const SENSITIVE_COMMANDS: [&str; 9] = [
    "authenticate",
    "saslstart",
    "saslcontinue",
    "getnonce",
    "createuser",
    "updateuser",
    "copydbgetnonce",
    "copydbsaslstart",
    "copydb",
];

/// 명령 본문을 이벤트에서 숨겨야 하는지 여부
///
/// `hello`/`isMaster`는 `speculativeAuthenticate`를 실었을 때만 숨깁니다.
pub fn is_sensitive_command(command_name: &str, command: &Document) -> bool {
    let lower = command_name.to_ascii_lowercase();
    if SENSITIVE_COMMANDS.contains(&lower.as_str()) {
        return true;
    }
    (lower == "hello" || lower == "ismaster") && command.contains_key("speculativeAuthenticate")
}

// ============================================================================
// Event Records
// ============================================================================

/// 명령 시작
#[derive(Debug, Clone)]
pub struct CommandStartedEvent {
    pub connection_id: ConnectionId,
    pub address: String,
    pub request_id: i32,
    pub database_name: String,
    pub command_name: String,
    /// 전송된 명령 (민감한 명령은 빈 문서)
    pub command: Document,
    pub service_id: Option<ObjectId>,
}

/// 명령 성공
#[derive(Debug, Clone)]
pub struct CommandSucceededEvent {
    pub connection_id: ConnectionId,
    pub address: String,
    pub request_id: i32,
    pub command_name: String,
    /// 응답 (민감한 명령은 빈 문서)
    pub reply: Document,
    pub duration: Duration,
    pub service_id: Option<ObjectId>,
}

/// 명령 실패
#[derive(Debug, Clone)]
pub struct CommandFailedEvent {
    pub connection_id: ConnectionId,
    pub address: String,
    pub request_id: i32,
    pub command_name: String,
    pub failure: DriverError,
    pub duration: Duration,
    pub service_id: Option<ObjectId>,
}

/// 연결 이벤트
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    CommandStarted(CommandStartedEvent),
    CommandSucceeded(CommandSucceededEvent),
    CommandFailed(CommandFailedEvent),
    /// 응답에 `$clusterTime`이 포함됨
    ClusterTimeReceived {
        connection_id: ConnectionId,
        cluster_time: ClusterTime,
    },
    /// 연결 종료 (연결당 정확히 한 번)
    Closed {
        connection_id: ConnectionId,
        address: String,
        error: Option<DriverError>,
    },
    /// 커서/트랜잭션에 고정됨
    Pinned {
        connection_id: ConnectionId,
        address: String,
        service_id: Option<ObjectId>,
    },
    /// 고정 해제
    Unpinned {
        connection_id: ConnectionId,
        address: String,
        service_id: Option<ObjectId>,
    },
}

impl ConnectionEvent {
    /// 이벤트를 발생시킨 연결
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            ConnectionEvent::CommandStarted(e) => e.connection_id,
            ConnectionEvent::CommandSucceeded(e) => e.connection_id,
            ConnectionEvent::CommandFailed(e) => e.connection_id,
            ConnectionEvent::ClusterTimeReceived { connection_id, .. }
            | ConnectionEvent::Closed { connection_id, .. }
            | ConnectionEvent::Pinned { connection_id, .. }
            | ConnectionEvent::Unpinned { connection_id, .. } => *connection_id,
        }
    }

    /// 명령 이름 (명령 이벤트만)
    pub fn command_name(&self) -> Option<&str> {
        match self {
            ConnectionEvent::CommandStarted(e) => Some(&e.command_name),
            ConnectionEvent::CommandSucceeded(e) => Some(&e.command_name),
            ConnectionEvent::CommandFailed(e) => Some(&e.command_name),
            _ => None,
        }
    }
}

// ============================================================================
// EventPublisher
// ============================================================================

/// 연결 이벤트 발행자
///
/// 구독자가 없으면 이벤트는 버려집니다. 느린 구독자는 `Lagged`를 받습니다.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<ConnectionEvent>,
}

impl EventPublisher {
    /// 지정 용량으로 생성
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 구독
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.sender.subscribe()
    }

    /// 발행
    pub fn publish(&self, event: ConnectionEvent) {
        let _ = self.sender.send(event);
    }

    /// 구독자 수
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_sensitive_commands() {
        assert!(is_sensitive_command("saslStart", &doc! { "saslStart": 1 }));
        assert!(is_sensitive_command("createUser", &doc! {}));
        assert!(!is_sensitive_command("find", &doc! { "find": "c" }));
        assert!(!is_sensitive_command("hello", &doc! { "hello": 1 }));
        assert!(is_sensitive_command(
            "hello",
            &doc! { "hello": 1, "speculativeAuthenticate": { "mechanism": "SCRAM-SHA-256" } }
        ));
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let publisher = EventPublisher::new(8);
        // no subscribers: dropped silently
        publisher.publish(ConnectionEvent::Pinned {
            connection_id: ConnectionId::Numeric(1),
            address: "a:1".to_string(),
            service_id: None,
        });

        let mut rx = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);
        publisher.publish(ConnectionEvent::Closed {
            connection_id: ConnectionId::Numeric(1),
            address: "a:1".to_string(),
            error: None,
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ConnectionEvent::Closed { .. }));
        assert_eq!(event.connection_id(), ConnectionId::Numeric(1));
        assert!(event.command_name().is_none());
    }
}

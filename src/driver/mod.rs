//! Driver Module
//!
//! 서버 연결 하나의 프로토콜 엔진
//!
//! # Components
//!
//! - 명령 조립 (Command Assembler): 세션, 클러스터 시간, 읽기 선호도, 서버 API
//! - 작업 매칭 (Operation Correlator): request id별 대기 작업, 모니터링 연결 고아 복구
//! - 타임아웃/취소 (Timeout & Cancellation Controller)
//! - 연결 수명 주기 (Connection): `command`, `exhaust_command`, `destroy`, 이벤트
//! - 암호화 데코레이터 (EncryptedConnection)
//!
//! # Example
//!
//! ```ignore
//! use docdb_driver::driver::{
//!     CommandOptions, Connection, ConnectionConfig, DestroyOptions, HelloReply,
//! };
//! use bson::doc;
//!
//! let config = ConnectionConfig::builder("localhost:27017")
//!     .id(1)
//!     .compressors(["zstd", "zlib"])
//!     .monitor_commands(true)
//!     .build()?;
//! let connection = Connection::connect(config).await?;
//!
//! // 핸드셰이크
//! let reply = connection
//!     .command("admin", &doc! { "hello": 1, "compression": ["zstd", "zlib"] }, CommandOptions::new())
//!     .await?;
//! connection.record_hello(HelloReply::parse(reply.document.unwrap_or_default())?)?;
//!
//! // 이벤트 구독
//! let mut events = connection.subscribe();
//!
//! // 명령 실행
//! let reply = connection
//!     .command("app.users", &doc! { "find": "users", "filter": {} }, CommandOptions::new())
//!     .await?;
//!
//! connection.destroy(DestroyOptions::default()).await;
//! ```

pub mod cluster_time;
pub mod command;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod description;
pub mod encrypted;
pub mod error;
pub mod events;
pub mod session;
pub mod timeout;

#[cfg(test)]
pub(crate) mod mock;

// Re-exports
pub use cluster_time::ClusterTime;
pub use command::{assemble, AssembledCommand, AssemblyContext, CommandOptions, Namespace};
pub use config::{ConnectionConfig, ConnectionConfigBuilder, ConnectionId};
pub use connection::{Connection, DestroyOptions, ExhaustStream};
pub use correlator::{CommandReply, OperationCorrelator, PendingOperation};
pub use description::{HelloReply, StreamDescription};
pub use encrypted::{AutoEncrypter, EncryptedConnection};
pub use error::{DriverError, DriverResult, ServerError, WriteConcernError};
pub use events::{
    CommandFailedEvent, CommandStartedEvent, CommandSucceededEvent, ConnectionEvent,
    EventPublisher,
};
pub use session::{
    ClientSession, ReadPreference, ReadPreferenceMode, ServerApi, SimpleSession, WriteConcern,
};
pub use timeout::TimeoutController;

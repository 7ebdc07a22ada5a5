//! Encrypted Connection
//!
//! 자동 필드 암호화 데코레이터. 명령을 암호화해 내부 연결로 보내고 응답을
//! 복호화합니다.

use std::sync::Arc;

use async_trait::async_trait;
use bson::Document;

use super::command::{CommandOptions, Namespace};
use super::connection::Connection;
use super::correlator::CommandReply;
use super::error::{DriverError, DriverResult};

/// 자동 암호화를 지원하는 최소 wire 버전
pub const MIN_ENCRYPTION_WIRE_VERSION: i32 = 8;

/// 명령 암호화/응답 복호화 협력 객체
#[async_trait]
pub trait AutoEncrypter: Send + Sync {
    /// 데이터베이스 `database`로 가는 명령 암호화
    async fn encrypt(&self, database: &str, command: Document) -> DriverResult<Document>;

    /// 응답 복호화
    async fn decrypt(&self, reply: Document) -> DriverResult<Document>;
}

/// 암호화 연결
pub struct EncryptedConnection {
    connection: Connection,
    encrypter: Option<Arc<dyn AutoEncrypter>>,
}

impl std::fmt::Debug for EncryptedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedConnection")
            .field("connection", &self.connection)
            .field("encrypter", &self.encrypter.is_some())
            .finish()
    }
}

impl EncryptedConnection {
    /// 연결 감싸기
    pub fn new(connection: Connection, encrypter: Option<Arc<dyn AutoEncrypter>>) -> Self {
        Self {
            connection,
            encrypter,
        }
    }

    /// 내부 연결
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// 내부 연결 꺼내기
    pub fn into_inner(self) -> Connection {
        self.connection
    }

    /// 암호화된 명령 실행
    ///
    /// 핸드셰이크 전(wire 버전 0)에는 암호화 없이 그대로 보냅니다.
    pub async fn command(
        &self,
        ns: &str,
        command: &Document,
        options: CommandOptions,
    ) -> DriverResult<CommandReply> {
        let encrypter = self.encrypter.as_ref().ok_or_else(|| {
            DriverError::missing_dependency("No AutoEncrypter available for encryption")
        })?;

        let wire_version = self.connection.description().max_wire_version;
        if wire_version == 0 {
            return self.connection.command(ns, command, options).await;
        }
        if wire_version < MIN_ENCRYPTION_WIRE_VERSION {
            return Err(DriverError::compatibility(
                "Auto-encryption requires a minimum MongoDB version of 4.2",
            ));
        }

        let database = Namespace::parse(ns)?.db;
        let encrypted = encrypter.encrypt(&database, command.clone()).await?;
        let mut reply = self.connection.command(ns, &encrypted, options).await?;

        if let Some(document) = reply.document.take() {
            reply.document = Some(encrypter.decrypt(document).await?);
        }
        Ok(reply)
    }
}

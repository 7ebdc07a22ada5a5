//! Connection Engine
//!
//! 서버 연결 하나의 수명 주기: 명령 전송, 응답 읽기 루프, exhaust 스트림, 종료
//!
//! # Example
//!
//! ```ignore
//! use docdb_driver::driver::{CommandOptions, Connection, ConnectionConfig, DestroyOptions};
//! use bson::doc;
//!
//! let config = ConnectionConfig::builder("localhost:27017").id(1).build()?;
//! let connection = Connection::connect(config).await?;
//!
//! let reply = connection
//!     .command("admin.$cmd", &doc! { "ping": 1 }, CommandOptions::new())
//!     .await?;
//!
//! connection.destroy(DestroyOptions::default()).await;
//! ```

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bson::oid::ObjectId;
use bson::{doc, Document};
use bytes::BytesMut;
use futures::Stream;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};

use super::cluster_time::ClusterTime;
use super::command::{assemble, AssemblyContext, CommandOptions, Namespace};
use super::config::{ConnectionConfig, ConnectionId};
use super::correlator::{
    process_reply, reply_ok, CommandReply, Match, OperationCorrelator, PendingOperation,
    INVALID_QUEUE_SIZE,
};
use super::description::{HelloReply, StreamDescription};
use super::error::{DriverError, DriverResult};
use super::events::{
    is_sensitive_command, CommandFailedEvent, CommandStartedEvent, CommandSucceededEvent,
    ConnectionEvent, EventPublisher,
};
use super::timeout::{sleep_until, TimeoutController};
use crate::wire::{
    can_compress, compress_message, decompress_message, next_request_id, MessageFramer,
    MessageHeader, ReplyEnvelope, HEADER_SIZE,
};

/// 읽기 버퍼 초기 크기
const READ_BUFFER_SIZE: usize = 16 * 1024;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type ReplyReceiver = mpsc::UnboundedReceiver<DriverResult<CommandReply>>;

// ============================================================================
// DestroyOptions
// ============================================================================

/// 연결 종료 옵션
#[derive(Debug, Clone, Copy, Default)]
pub struct DestroyOptions {
    /// `true`면 쓰기 쪽을 정리하지 않고 바로 끊음
    pub force: bool,
}

impl DestroyOptions {
    /// 강제 종료
    pub fn force() -> Self {
        Self { force: true }
    }
}

// ============================================================================
// ConnectionInner - 읽기 루프와 공유하는 상태
// ============================================================================

struct Handshake {
    hello: HelloReply,
    description: StreamDescription,
}

struct ConnectionInner {
    id: ConnectionId,
    address: String,
    generation: u32,
    config: ConnectionConfig,
    initial_description: StreamDescription,
    /// 핸드셰이크 후 한 번만 설정됨
    handshake: OnceLock<Handshake>,
    cluster_time: Mutex<Option<ClusterTime>>,
    last_use: Mutex<Instant>,
    /// 한 번 true가 되면 되돌아가지 않음
    closed: AtomicBool,
    pinned: AtomicBool,
    max_message_size: AtomicUsize,
    correlator: OperationCorrelator,
    timeout: TimeoutController,
    events: EventPublisher,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    closed_tx: watch::Sender<bool>,
}

impl ConnectionInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn description(&self) -> &StreamDescription {
        self.handshake
            .get()
            .map(|h| &h.description)
            .unwrap_or(&self.initial_description)
    }

    fn closed_error(&self) -> DriverError {
        DriverError::network(format!("connection {} to {} closed", self.id, self.address))
    }

    fn timeout_error(&self) -> DriverError {
        DriverError::network_timeout(
            format!("connection {} to {} timed out", self.id, self.address),
            self.handshake.get().is_none(),
        )
    }

    async fn write(&self, bytes: &[u8], dispatch: &mut DispatchGuard<'_>) -> DriverResult<()> {
        let token = self.timeout.token();
        let mut guard = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(self.closed_error()),
            guard = self.writer.lock() => guard,
        };
        let writer = guard.as_mut().ok_or_else(|| self.closed_error())?;
        dispatch.writing = true;

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(self.closed_error()),
            result = async {
                writer.write_all(bytes).await?;
                writer.flush().await
            } => result,
        };
        result.map_err(|e| {
            DriverError::network(format!(
                "connection {} to {} errored: {}",
                self.id, self.address, e
            ))
        })
    }

    /// 응답 하나 처리. `Err`는 연결을 닫아야 하는 에러입니다.
    fn on_message(&self, frame: BytesMut) -> DriverResult<()> {
        self.timeout.clear_closing_timer();
        let previous_timeout = self.timeout.disarm();

        let message = decompress_message(frame, self.max_message_size.load(Ordering::Relaxed))?;
        let header = MessageHeader::read(&message)?;

        let op = match self.correlator.take(header.response_to, self.config.monitoring) {
            Match::Found(op) => op,
            Match::Orphan(op) => {
                debug!(
                    connection_id = %self.id,
                    request_id = op.request_id,
                    response_to = header.response_to,
                    "recovered operation for unmatched reply on monitoring connection"
                );
                op
            }
            Match::Unmatched => {
                debug!(
                    connection_id = %self.id,
                    response_to = header.response_to,
                    "dropping reply with no pending operation"
                );
                return Ok(());
            }
            Match::InvalidQueueSize(pending) => {
                warn!(connection_id = %self.id, pending, "{}", INVALID_QUEUE_SIZE);
                return Err(DriverError::internal(INVALID_QUEUE_SIZE));
            }
        };

        let envelope = match ReplyEnvelope::parse(&message) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.complete(&op, Err(e.into()));
                return Ok(());
            }
        };

        let processed = process_reply(&op, &envelope);
        if let Some(cluster_time) = processed.cluster_time {
            self.record_cluster_time(cluster_time);
        }

        // moreToCome: the next reply answers this reply's request id.
        // An error reply ends the stream even if the flag is set.
        let mut reinserted = true;
        if envelope.more_to_come && processed.result.is_ok() {
            reinserted = self
                .correlator
                .reinsert(envelope.request_id, op.clone())
                .is_ok();
            if reinserted {
                self.timeout.restore(previous_timeout);
            }
        }
        self.complete(&op, processed.result);

        if !reinserted {
            op.deliver(Err(self.closed_error()));
        }
        Ok(())
    }

    fn record_cluster_time(&self, cluster_time: ClusterTime) {
        {
            let mut current = self.cluster_time.lock();
            if current.as_ref().map_or(true, |c| cluster_time > *c) {
                *current = Some(cluster_time.clone());
            }
        }
        self.events.publish(ConnectionEvent::ClusterTimeReceived {
            connection_id: self.id,
            cluster_time,
        });
    }

    /// 결과 전달과 명령 이벤트 발행
    fn complete(&self, op: &PendingOperation, result: DriverResult<CommandReply>) {
        if op.monitored {
            self.publish_outcome(op, &result);
        }
        op.deliver(result);
    }

    fn publish_outcome(&self, op: &PendingOperation, result: &DriverResult<CommandReply>) {
        let duration = op.started_at.elapsed();
        let service_id = self.description().service_id;
        let succeeded = |reply: Document| {
            ConnectionEvent::CommandSucceeded(CommandSucceededEvent {
                connection_id: self.id,
                address: self.address.clone(),
                request_id: op.request_id,
                command_name: op.command_name.clone(),
                reply: if op.redacted { Document::new() } else { reply },
                duration,
                service_id,
            })
        };

        let event = match result {
            Ok(reply) => succeeded(reply.document.clone().unwrap_or_else(|| doc! { "ok": 1 })),
            // write concern errors still carry ok: 1
            Err(err) => match err.reply_document() {
                Some(reply) if reply_ok(reply) => succeeded(reply.clone()),
                _ => ConnectionEvent::CommandFailed(CommandFailedEvent {
                    connection_id: self.id,
                    address: self.address.clone(),
                    request_id: op.request_id,
                    command_name: op.command_name.clone(),
                    failure: err.clone(),
                    duration,
                    service_id,
                }),
            },
        };
        self.events.publish(event);
    }

    /// 연결 정리. 처음 호출만 효과가 있습니다.
    async fn cleanup(&self, force: bool, error: DriverError) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(
            connection_id = %self.id,
            address = %self.address,
            force,
            error = %error,
            "closing connection"
        );

        self.timeout.cancel();
        let writer = self.writer.lock().await.take();
        if let (Some(mut writer), false) = (writer, force) {
            if let Err(e) = writer.shutdown().await {
                trace!(connection_id = %self.id, error = %e, "shutdown failed");
            }
        }

        for op in self.correlator.drain() {
            self.complete(&op, Err(error.clone()));
        }

        self.events.publish(ConnectionEvent::Closed {
            connection_id: self.id,
            address: self.address.clone(),
            error: Some(error),
        });
        self.closed_tx.send_replace(true);
    }
}

/// `dispatch` 도중 future가 버려졌을 때의 뒷정리
///
/// 쓰기 전이면 대기 항목만 지우고, 쓰기가 시작됐으면 스트림에 반쯤 쓴 메시지가
/// 남았을 수 있으므로 연결을 닫습니다.
struct DispatchGuard<'a> {
    inner: &'a ConnectionInner,
    request_id: i32,
    writing: bool,
    armed: bool,
}

impl<'a> DispatchGuard<'a> {
    fn new(inner: &'a ConnectionInner, request_id: i32) -> Self {
        Self {
            inner,
            request_id,
            writing: false,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let inner = self.inner;
        if let Some(op) = inner.correlator.remove(self.request_id) {
            inner.complete(
                &op,
                Err(DriverError::network(format!(
                    "operation {} on connection {} to {} was cancelled",
                    self.request_id, inner.id, inner.address
                ))),
            );
        }

        if self.writing {
            debug!(
                connection_id = %inner.id,
                request_id = self.request_id,
                "command dropped mid-write, closing connection"
            );
            // the read loop sees the token and runs cleanup
            inner.timeout.cancel();
        } else if inner.correlator.is_empty() {
            inner.timeout.disarm();
        }
    }
}

async fn read_loop(inner: Arc<ConnectionInner>, mut reader: BoxedReader) {
    let token = inner.timeout.token();
    let mut framer = MessageFramer::with_max_size(inner.max_message_size.load(Ordering::Relaxed));
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut idle_since = tokio::time::Instant::now();

    let error = loop {
        framer.set_max_message_size(inner.max_message_size.load(Ordering::Relaxed));
        match framer.decode(&mut buffer) {
            Ok(Some(frame)) => {
                if let Err(e) = inner.on_message(frame) {
                    break e;
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => break DriverError::from(e),
        }

        let socket_deadline = inner.timeout.socket_timeout().map(|t| idle_since + t);
        let closing_deadline = inner.timeout.closing_deadline();

        tokio::select! {
            _ = token.cancelled() => break inner.closed_error(),
            _ = inner.timeout.changed() => idle_since = tokio::time::Instant::now(),
            read = reader.read_buf(&mut buffer) => match read {
                Ok(0) => break inner.closed_error(),
                Ok(_) => idle_since = tokio::time::Instant::now(),
                Err(e) => {
                    break DriverError::network(format!(
                        "connection {} to {} errored: {}",
                        inner.id, inner.address, e
                    ))
                }
            },
            _ = sleep_until(socket_deadline) => {
                debug!(connection_id = %inner.id, address = %inner.address, "socket timeout elapsed");
                inner.timeout.start_closing_timer();
                idle_since = tokio::time::Instant::now();
            }
            _ = sleep_until(closing_deadline) => break inner.timeout_error(),
        }
    };

    debug!(connection_id = %inner.id, reason = %error, "read loop finished");
    inner.cleanup(true, error).await;
}

// ============================================================================
// Connection
// ============================================================================

/// 서버 연결 하나
///
/// 명령은 여러 태스크에서 동시에 보낼 수 있고 응답은 request id로 짝지어집니다.
/// 연결을 버리면 읽기 루프도 멈춥니다.
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("address", &self.inner.address)
            .field("generation", &self.inner.generation)
            .field("closed", &self.inner.is_closed())
            .field("pending", &self.inner.correlator.len())
            .finish()
    }
}

impl Connection {
    /// TCP로 연결
    pub async fn connect(config: ConnectionConfig) -> DriverResult<Self> {
        config.validate()?;
        let connecting = TcpStream::connect(config.address.as_str());
        let connected = if config.connect_timeout.is_zero() {
            connecting.await
        } else {
            tokio::time::timeout(config.connect_timeout, connecting)
                .await
                .map_err(|_| {
                    DriverError::network_timeout(
                        format!(
                            "connection {} to {} timed out",
                            config.connection_id(),
                            config.address
                        ),
                        true,
                    )
                })?
        };
        let stream = connected.map_err(|e| {
            DriverError::network(format!("failed to connect to {}: {}", config.address, e))
        })?;

        stream.set_nodelay(true).ok();
        Self::from_stream(stream, config)
    }

    /// 이미 열린 스트림으로 연결 생성 (읽기 루프를 띄우므로 런타임 안에서 호출)
    pub fn from_stream<S>(stream: S, config: ConnectionConfig) -> DriverResult<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;
        let (reader, writer) = tokio::io::split(stream);
        let (closed_tx, _) = watch::channel(false);

        let inner = Arc::new(ConnectionInner {
            id: config.connection_id(),
            address: config.address.clone(),
            generation: config.generation,
            initial_description: StreamDescription::initial(&config),
            handshake: OnceLock::new(),
            cluster_time: Mutex::new(None),
            last_use: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            pinned: AtomicBool::new(false),
            max_message_size: AtomicUsize::new(config.max_message_size),
            correlator: OperationCorrelator::new(),
            timeout: TimeoutController::new(config.socket_timeout),
            events: EventPublisher::new(config.event_channel_size),
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            closed_tx,
            config,
        });

        trace!(connection_id = %inner.id, address = %inner.address, "connection opened");
        tokio::spawn(read_loop(inner.clone(), Box::new(reader)));
        Ok(Self { inner })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// 연결 식별자
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// 서버 주소
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// 세대 번호
    pub fn generation(&self) -> u32 {
        self.inner.generation
    }

    /// 설정
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// 기록된 핸드셰이크 응답
    pub fn hello(&self) -> Option<&HelloReply> {
        self.inner.handshake.get().map(|h| &h.hello)
    }

    /// 현재 서버 기능 스냅샷
    pub fn description(&self) -> &StreamDescription {
        self.inner.description()
    }

    /// 로드밸런서 서비스 id
    pub fn service_id(&self) -> Option<ObjectId> {
        self.inner.description().service_id
    }

    /// 이 연결이 본 가장 큰 클러스터 시간
    pub fn cluster_time(&self) -> Option<ClusterTime> {
        self.inner.cluster_time.lock().clone()
    }

    /// 닫혔는지 여부
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// 마지막으로 풀에 반환된 뒤 지난 시간
    pub fn idle_time(&self) -> Duration {
        self.inner.last_use.lock().elapsed()
    }

    /// 응답을 기다리는 작업 수
    pub fn pending_operations(&self) -> usize {
        self.inner.correlator.len()
    }

    /// 이벤트 구독
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// 핸드셰이크 응답 기록. 연결당 한 번만 허용됩니다.
    pub fn record_hello(&self, hello: HelloReply) -> DriverResult<()> {
        let description = StreamDescription::from_hello(&hello, &self.inner.config);
        let max_message_size = (description.max_message_size_bytes.max(0) as usize).max(HEADER_SIZE);
        let compressor = description.compressor;

        self.inner
            .handshake
            .set(Handshake { hello, description })
            .map_err(|_| DriverError::internal("handshake reply already recorded"))?;
        self.inner
            .max_message_size
            .store(max_message_size, Ordering::Relaxed);

        debug!(
            connection_id = %self.inner.id,
            compressor = ?compressor.map(|c| c.name()),
            max_message_size,
            "handshake recorded"
        );
        Ok(())
    }

    /// 풀에 반환될 때 호출
    pub fn mark_available(&self) {
        *self.inner.last_use.lock() = Instant::now();
    }

    /// 커서/트랜잭션에 고정
    pub fn mark_pinned(&self) {
        if !self.inner.pinned.swap(true, Ordering::AcqRel) {
            self.inner.events.publish(ConnectionEvent::Pinned {
                connection_id: self.inner.id,
                address: self.inner.address.clone(),
                service_id: self.service_id(),
            });
        }
    }

    /// 고정 해제
    pub fn mark_unpinned(&self) {
        if self.inner.pinned.swap(false, Ordering::AcqRel) {
            self.inner.events.publish(ConnectionEvent::Unpinned {
                connection_id: self.inner.id,
                address: self.inner.address.clone(),
                service_id: self.service_id(),
            });
        }
    }

    /// 고정 여부
    pub fn is_pinned(&self) -> bool {
        self.inner.pinned.load(Ordering::Acquire)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// 명령 실행
    ///
    /// `ns`는 `db` 또는 `db.collection` 형식입니다. 호출자의 명령 문서는 변경하지
    /// 않습니다.
    pub async fn command(
        &self,
        ns: &str,
        command: &Document,
        options: CommandOptions,
    ) -> DriverResult<CommandReply> {
        let mut replies = self.dispatch(ns, command, options).await?;
        match replies.recv().await {
            Some(result) => result,
            None => Err(self.inner.closed_error()),
        }
    }

    /// exhaust 명령 실행
    ///
    /// 서버가 moreToCome 없이 응답할 때까지 응답마다 `on_reply`를 순서대로
    /// 호출합니다.
    pub async fn exhaust_command<F>(
        &self,
        ns: &str,
        command: &Document,
        options: CommandOptions,
        mut on_reply: F,
    ) -> DriverResult<()>
    where
        F: FnMut(CommandReply),
    {
        let mut replies = self
            .dispatch(ns, command, options.with_exhaust_allowed())
            .await?;
        loop {
            match replies.recv().await {
                Some(Ok(reply)) => {
                    let more_to_come = reply.more_to_come;
                    on_reply(reply);
                    if !more_to_come {
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Err(exhaust_ended()),
            }
        }
    }

    /// exhaust 명령을 스트림으로 실행
    pub async fn exhaust_stream(
        &self,
        ns: &str,
        command: &Document,
        options: CommandOptions,
    ) -> DriverResult<ExhaustStream> {
        let replies = self
            .dispatch(ns, command, options.with_exhaust_allowed())
            .await?;
        Ok(ExhaustStream::new(replies))
    }

    async fn dispatch(
        &self,
        ns: &str,
        command: &Document,
        options: CommandOptions,
    ) -> DriverResult<ReplyReceiver> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(inner.closed_error());
        }

        let ns = Namespace::parse(ns)?;
        let description = inner.description();
        let cluster_time = inner.cluster_time.lock().clone();
        let request_id = next_request_id();
        let assembled = assemble(
            &ns,
            command,
            &options,
            AssemblyContext {
                description,
                cluster_time: cluster_time.as_ref(),
                server_api: inner.config.server_api.as_ref(),
            },
            request_id,
        )?;

        let encoded = assembled.message.encode()?;
        let compressor = description
            .compressor
            .filter(|_| can_compress(&assembled.command_name));
        let bytes = match compressor {
            Some(compressor) => compress_message(&encoded, compressor)?,
            None => encoded,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let monitored = inner.config.monitor_commands;
        let redacted = is_sensitive_command(&assembled.command_name, &assembled.command);
        let op = PendingOperation::new(
            request_id,
            assembled.command_name.clone(),
            assembled.database.clone(),
            options.session.clone(),
            options.decode.clone(),
            options.no_response,
            compressor,
            tx,
        )
        .with_monitoring(monitored, redacted);

        inner.timeout.arm(options.socket_timeout);
        if monitored {
            inner
                .events
                .publish(ConnectionEvent::CommandStarted(CommandStartedEvent {
                    connection_id: inner.id,
                    address: inner.address.clone(),
                    request_id,
                    database_name: assembled.database.clone(),
                    command_name: assembled.command_name.clone(),
                    command: if redacted {
                        Document::new()
                    } else {
                        assembled.command.clone()
                    },
                    service_id: description.service_id,
                }));
        }

        if !options.no_response {
            if let Err(op) = inner.correlator.insert(op.clone()) {
                inner.complete(&op, Err(inner.closed_error()));
                return Ok(rx);
            }
        }
        let mut guard = DispatchGuard::new(inner, request_id);

        trace!(
            connection_id = %inner.id,
            request_id,
            command_name = %assembled.command_name,
            bytes = bytes.len(),
            "writing command"
        );
        let written = inner.write(&bytes, &mut guard).await;
        guard.disarm();
        if let Err(e) = written {
            // whoever removes the entry delivers the result
            let owned = if options.no_response {
                Some(op)
            } else {
                inner.correlator.remove(request_id)
            };
            if let Some(op) = owned {
                inner.complete(&op, Err(e.clone()));
            }
            inner.cleanup(true, e).await;
            return Ok(rx);
        }

        if options.no_response {
            inner.complete(&op, Ok(CommandReply::empty(request_id)));
        }
        Ok(rx)
    }

    /// 연결 종료
    ///
    /// 대기 중인 모든 작업은 닫힘 에러를 받습니다. 여러 번 호출해도 안전하며,
    /// 모든 호출은 정리가 끝난 뒤 반환됩니다.
    pub async fn destroy(&self, options: DestroyOptions) {
        let mut closed = self.inner.closed_tx.subscribe();
        self.inner
            .cleanup(options.force, self.inner.closed_error())
            .await;
        while !*closed.borrow_and_update() {
            if closed.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.inner.timeout.cancel();
    }
}

fn exhaust_ended() -> DriverError {
    DriverError::unexpected_response("Server ended moreToCome unexpectedly")
}

// ============================================================================
// ExhaustStream
// ============================================================================

/// exhaust 응답 스트림
///
/// moreToCome 없는 응답이나 에러 뒤에 끝납니다. 그 전에 채널이 닫히면
/// `UnexpectedResponse` 에러를 한 번 내보냅니다.
pub struct ExhaustStream {
    inner: UnboundedReceiverStream<DriverResult<CommandReply>>,
    finished: bool,
}

impl fmt::Debug for ExhaustStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExhaustStream")
            .field("finished", &self.finished)
            .finish()
    }
}

impl ExhaustStream {
    fn new(replies: ReplyReceiver) -> Self {
        Self {
            inner: UnboundedReceiverStream::new(replies),
            finished: false,
        }
    }

    /// 끝났는지 여부
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Stream for ExhaustStream {
    type Item = DriverResult<CommandReply>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(reply))) => {
                self.finished = !reply.more_to_come;
                Poll::Ready(Some(Ok(reply)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.finished = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(Err(exhaust_ended())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

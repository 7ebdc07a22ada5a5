//! Timeout & Cancellation Controller
//!
//! 명령별 소켓 타임아웃, 종료 지연 타이머, 연결 단위 취소 신호

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 소켓 타임아웃이 난 뒤 에러로 전환하기까지의 지연
pub const CLOSING_DELAY: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct State {
    /// 현재 유휴 타임아웃 (`None` = 사용 안 함)
    socket_timeout: Option<Duration>,
    /// 종료 지연 타이머 만료 시각
    closing_deadline: Option<Instant>,
}

/// 연결 하나의 타임아웃과 취소 상태
///
/// 쓰기 쪽이 타임아웃을 설정하고 읽기 루프가 해제/재설정합니다. 값이 바뀌면
/// 읽기 루프를 깨워 타이머를 다시 계산하게 합니다.
#[derive(Debug)]
pub struct TimeoutController {
    default_timeout: Duration,
    state: Mutex<State>,
    changed: Notify,
    cancel: CancellationToken,
}

impl TimeoutController {
    /// 연결 기본 타임아웃으로 생성 (0 = 사용 안 함)
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            state: Mutex::new(State::default()),
            changed: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// 쓰기 전에 타임아웃 설정. 명령별 값이 없으면 연결 기본값을 씁니다.
    pub fn arm(&self, per_command: Option<Duration>) {
        let timeout = per_command.unwrap_or(self.default_timeout);
        self.state.lock().socket_timeout = non_zero(timeout);
        self.changed.notify_one();
    }

    /// 응답 처리 시작 시 타임아웃 해제. 이전 값을 돌려줍니다.
    pub fn disarm(&self) -> Option<Duration> {
        let previous = self.state.lock().socket_timeout.take();
        if previous.is_some() {
            self.changed.notify_one();
        }
        previous
    }

    /// moreToCome 응답 뒤 이전 타임아웃 복원
    pub fn restore(&self, previous: Option<Duration>) {
        self.state.lock().socket_timeout = previous;
        self.changed.notify_one();
    }

    /// 현재 소켓 타임아웃
    pub fn socket_timeout(&self) -> Option<Duration> {
        self.state.lock().socket_timeout
    }

    /// 종료 지연 타이머 시작 (이미 시작됐으면 유지)
    pub fn start_closing_timer(&self) {
        let mut state = self.state.lock();
        if state.closing_deadline.is_none() {
            state.closing_deadline = Some(Instant::now() + CLOSING_DELAY);
        }
    }

    /// 메시지 수신 시 종료 지연 타이머 취소
    pub fn clear_closing_timer(&self) {
        self.state.lock().closing_deadline = None;
    }

    /// 종료 지연 타이머 만료 시각
    pub fn closing_deadline(&self) -> Option<Instant> {
        self.state.lock().closing_deadline
    }

    /// 타임아웃 값이 바뀔 때까지 대기
    pub async fn changed(&self) {
        self.changed.notified().await
    }

    /// 연결 취소 토큰
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 진행 중인 모든 읽기/쓰기 취소
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 취소 여부
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn non_zero(timeout: Duration) -> Option<Duration> {
    if timeout.is_zero() {
        None
    } else {
        Some(timeout)
    }
}

/// 만료 시각까지 대기. `None`이면 영원히 대기합니다.
pub async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

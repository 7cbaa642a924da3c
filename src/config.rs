//! 노드 설정

use std::collections::BTreeMap;
use std::time::Duration;

use crate::tracker::RetryPolicy;
use crate::{DEFAULT_BACKOFF_BASE, DEFAULT_MAX_RETRIES, DEFAULT_SEND_PACING_MS};

/// Ackcast 노드 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 노드 이름 (전송 계층 `name` 헤더로 공개)
    pub node_name: String,

    /// 시작 시 가입할 그룹
    pub groups: Vec<String>,

    /// ACK 대상 메시지 타입
    /// 수신 시 ACK 전송, 송신 시 ACK 추적 대상
    pub message_types: Vec<String>,

    /// 수신 이벤트 전체 로깅
    pub verbose: bool,

    /// 네트워크 인터페이스 (None이면 전송 계층 기본값)
    pub interface: Option<String>,

    /// ACK 송수신 활성화
    pub acknowledge: bool,

    /// 고정 노드 ID (None이면 전송 계층이 생성)
    pub node_id: Option<String>,

    /// 추가 전송 헤더
    pub extra_headers: BTreeMap<String, String>,

    /// 최대 재시도 횟수
    pub max_retries: u32,

    /// 최초 등록 후 재시도 간격 (밀리초)
    pub retry_interval_ms: u64,

    /// 지수 백오프 밑수
    pub backoff_base: u32,

    /// 백오프 단위 (밀리초)
    /// timeout = backoff_unit * backoff_base^retry_count
    pub backoff_unit_ms: u64,

    /// 메시지 추적 최대 기간 (밀리초)
    pub reply_horizon_ms: u64,

    /// 수신 루프 poll 타임아웃 (밀리초)
    /// 타임아웃마다 재전송 sweep 수행
    pub poll_timeout_ms: u64,

    /// 연속 송신 간격 (밀리초)
    /// 여러 그룹/피어로 연달아 보낼 때 전송 계층 메시지 손실 방지
    pub send_pacing_ms: u64,

    /// 애플리케이션 이벤트 채널 크기
    pub event_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: "ackcast-node".to_string(),
            groups: Vec::new(),
            message_types: Vec::new(),
            verbose: false,
            interface: None,
            acknowledge: false,
            node_id: None,
            extra_headers: BTreeMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval_ms: 5_000,              // 5초
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_unit_ms: 1_000,                // 1초
            reply_horizon_ms: 3_125_000,           // 5^5초
            poll_timeout_ms: 1_000,                // 1초
            send_pacing_ms: DEFAULT_SEND_PACING_MS,
            event_buffer_size: 1024,
        }
    }
}

impl Config {
    /// 이름으로 새 설정 생성
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            ..Self::default()
        }
    }

    /// 재시도 정책
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            backoff_base: self.backoff_base,
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
            reply_horizon: Duration::from_millis(self.reply_horizon_ms),
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn send_pacing(&self) -> Duration {
        Duration::from_millis(self.send_pacing_ms)
    }

    /// ACK 대상 타입 여부
    pub fn is_message_type_of_interest(&self, msg_type: &str) -> bool {
        self.message_types.iter().any(|t| t == msg_type)
    }

    /// 저지연 설정
    pub fn low_latency() -> Self {
        Self {
            acknowledge: true,
            max_retries: 3,
            retry_interval_ms: 500,
            backoff_base: 2,
            backoff_unit_ms: 250,
            reply_horizon_ms: 30_000,
            poll_timeout_ms: 100,
            send_pacing_ms: 0,                     // 간격 없음
            ..Self::default()
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            acknowledge: true,
            max_retries: 10,
            retry_interval_ms: 3_000,
            backoff_base: 2,
            backoff_unit_ms: 1_000,
            reply_horizon_ms: 3_600_000,           // 1시간
            poll_timeout_ms: 500,
            send_pacing_ms: 500,
            ..Self::default()
        }
    }
}

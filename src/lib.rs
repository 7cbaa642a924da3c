//! # Ackcast
//!
//! shout/whisper 그룹 메시징 위에 얹는 ACK 기반 전달 보장 계층
//!
//! ## 핵심 특징
//! - **ACK 추적**: 관심 타입 메시지는 수신자별 ACK 대기
//! - **재전송**: 고정 간격 후 지수 백오프, 재시도 한도/응답 기한 초과 시 폐기
//! - **수신자 지정**: receiverIds에 포함된 노드만 ACK
//! - **전송 계층 분리**: `GroupTransport` trait, 테스트용 메모리 허브 제공
//! - **단일 수신 루프**: 제어 채널, 전송 계층 수신, poll 타임아웃 multiplex

pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod literal;
pub mod message;
pub mod node;
pub mod stats;
pub mod tracker;
pub mod transport;

pub use classifier::{EventKind, InboundMessage};
pub use config::Config;
pub use dispatch::{Outgoing, PeerDirectory, RecipientSelector};
pub use error::{Error, Result};
pub use message::{Envelope, MessageHeader, Payload};
pub use node::{DeliveryStatus, Node, NodeEvent, NodeEvents};
pub use stats::DeliveryStats;
pub use tracker::{AckTracker, DropReason, PendingDelivery, RetryPolicy};
pub use transport::{GroupTransport, MemoryHub, MemoryTransport, RawEvent};

/// ACK 메시지 타입
pub const ACKNOWLEDGEMENT_TYPE: &str = "ACKNOWLEDGEMENT";

/// 기본 최대 재시도 횟수
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// 기본 지수 백오프 밑수
pub const DEFAULT_BACKOFF_BASE: u32 = 5;

/// 기본 연속 송신 간격 (밀리초)
pub const DEFAULT_SEND_PACING_MS: u64 = 250;

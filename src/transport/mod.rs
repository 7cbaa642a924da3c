//! 그룹 메시징 전송 계층 인터페이스
//!
//! 멤버십/탐색/heartbeat는 전송 계층 책임
//! 이 크레이트는 shout/whisper/수신만 사용

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

pub use memory::{MemoryHub, MemoryTransport};

/// 전송 계층 원시 이벤트
///
/// `event`는 전송 계층이 준 문자열 그대로 (ENTER, SHOUT, ...)
/// 분류는 `classifier`에서 수행
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub event: String,
    pub peer_id: String,
    pub peer_name: String,
    pub group: Option<String>,
    pub content: Bytes,
    pub headers: HashMap<String, String>,
}

impl RawEvent {
    pub fn new(
        event: impl Into<String>,
        peer_id: impl Into<String>,
        peer_name: impl Into<String>,
    ) -> Self {
        Self {
            event: event.into(),
            peer_id: peer_id.into(),
            peer_name: peer_name.into(),
            group: None,
            content: Bytes::new(),
            headers: HashMap::new(),
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_content(mut self, content: Bytes) -> Self {
        self.content = content;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

/// 그룹 메시징 전송 계층
#[async_trait]
pub trait GroupTransport: Send + Sync {
    /// 이 노드의 전송 계층 ID
    fn node_id(&self) -> &str;

    fn node_name(&self) -> &str;

    /// 현재 가입한 그룹
    fn own_groups(&self) -> Vec<String>;

    /// 다른 피어에게 공개할 헤더 (start 전에 설정)
    fn set_header(&self, key: &str, value: &str);

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn join(&self, group: &str) -> Result<()>;

    async fn leave(&self, group: &str) -> Result<()>;

    /// 그룹 전체에 전송
    async fn shout(&self, group: &str, content: Bytes) -> Result<()>;

    /// 피어 하나에 전송
    async fn whisper(&self, peer_id: &str, content: Bytes) -> Result<()>;

    /// 다음 이벤트까지 대기
    ///
    /// 취소되어도 이벤트를 잃지 않아야 함 (`select!`에서 사용)
    async fn recv(&self) -> Result<RawEvent>;
}

//! 메시지 봉투 (Envelope) 정의 및 코덱
//!
//! 와이어 형식은 JSON 객체:
//! `{"header": {"type", "msgId", "timestamp", "receiverIds"}, "payload": {...}}`

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{literal, Result, ACKNOWLEDGEMENT_TYPE};

/// 메시지 본문 (임의 필드)
pub type Payload = Map<String, Value>;

/// 메시지 헤더
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    /// 메시지 종류
    #[serde(rename = "type")]
    pub msg_type: String,

    /// 메시지 고유 ID
    #[serde(default)]
    pub msg_id: String,

    /// ISO-8601 타임스탬프
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// 수신 대상 ID/이름 목록
    /// 비어 있으면 누구든 ACK 가능
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub receiver_ids: Vec<String>,

    /// 그 외 헤더 필드 (metamodel 등)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageHeader {
    pub fn new(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            msg_id: Uuid::new_v4().to_string(),
            timestamp: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            receiver_ids: Vec::new(),
            extra: Map::new(),
        }
    }

    /// 타임스탬프 파싱
    pub fn parsed_timestamp(&self) -> Option<DateTime<FixedOffset>> {
        self.timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
    }

    /// 수신 대상이 명시되었는지
    pub fn is_addressed(&self) -> bool {
        !self.receiver_ids.is_empty()
    }

    /// 주어진 식별자 중 하나가 수신 대상에 포함되는지
    pub fn addresses_any(&self, identities: &[&str]) -> bool {
        self.receiver_ids
            .iter()
            .any(|id| identities.contains(&id.as_str()))
    }
}

/// 메시지 봉투
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub header: MessageHeader,

    #[serde(default)]
    pub payload: Payload,
}

impl Envelope {
    /// 새 ID와 현재 시각으로 봉투 생성
    pub fn new(msg_type: impl Into<String>) -> Self {
        Self {
            header: MessageHeader::new(msg_type),
            payload: Payload::new(),
        }
    }

    pub fn with_msg_id(mut self, msg_id: impl Into<String>) -> Self {
        self.header.msg_id = msg_id.into();
        self
    }

    pub fn with_receivers<I, S>(mut self, receivers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.header.receiver_ids = receivers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }

    /// `original`에 대한 ACK 메시지 생성
    pub fn acknowledgement_for(original: &Envelope) -> Self {
        Self::new(ACKNOWLEDGEMENT_TYPE).with_field("receivedMsg", original.msg_id())
    }

    pub fn is_acknowledgement(&self) -> bool {
        self.header.msg_type == ACKNOWLEDGEMENT_TYPE
    }

    /// ACK 메시지가 가리키는 원본 msgId
    pub fn acknowledged_msg_id(&self) -> Option<&str> {
        if !self.is_acknowledgement() {
            return None;
        }
        self.payload.get("receivedMsg").and_then(Value::as_str)
    }
}

/// 봉투를 와이어 바이트로 직렬화
pub fn encode(envelope: &Envelope) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(envelope)?))
}

/// 와이어 바이트에서 봉투 복원
///
/// JSON 파싱 실패 시 파이썬 리터럴 형식으로 재시도
/// 둘 다 실패하면 경고 로그 후 `None`
pub fn decode(bytes: &[u8]) -> Option<Envelope> {
    let strict_err = match serde_json::from_slice::<Envelope>(bytes) {
        Ok(envelope) => return Some(envelope),
        Err(e) => e,
    };

    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!("메시지 디코딩 실패 (UTF-8 아님): {}", e);
            return None;
        }
    };

    match literal::parse(text).map(serde_json::from_value::<Envelope>) {
        Some(Ok(envelope)) => {
            debug!("리터럴 형식 메시지 허용: msgId={}", envelope.msg_id());
            Some(envelope)
        }
        Some(Err(e)) => {
            warn!("메시지 디코딩 실패: {}", e);
            None
        }
        None => {
            warn!("메시지 디코딩 실패: {}", strict_err);
            None
        }
    }
}

/// 구조화되지 않은 문자열 메시지는 UTF-8 그대로 전송
pub fn raw_bytes(text: &str) -> Bytes {
    Bytes::copy_from_slice(text.as_bytes())
}

/// JSON 객체처럼 보이는 내용인지 (구조화 메시지 후보)
pub fn looks_structured(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .map_or(false, |b| *b == b'{')
}

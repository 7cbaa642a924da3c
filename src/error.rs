//! 에러 타입 정의

use thiserror::Error;

/// Ackcast 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("수신자 미지정")]
    NoRecipient,

    #[error("알 수 없는 피어: {peer}")]
    UnknownPeer { peer: String },

    #[error("전송 에러: {0}")]
    Transport(String),

    #[error("노드가 이미 시작됨: {name}")]
    AlreadyStarted { name: String },

    #[error("채널 에러")]
    ChannelError,

    #[error("연결 종료")]
    ConnectionClosed,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

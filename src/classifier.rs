//! 전송 계층 이벤트 분류
//!
//! 원시 이벤트를 `EventKind`로 변환하고 처리 방법(`Disposition`) 결정
//! - SHOUT/WHISPER만 애플리케이션 메시지
//! - ACKNOWLEDGEMENT 메시지는 추적기로만 전달
//! - ACK 전송 여부 판정

use bytes::Bytes;
use tracing::warn;

use crate::message::{self, Envelope};
use crate::transport::RawEvent;

/// 이벤트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Join,
    Leave,
    Enter,
    Exit,
    Hello,
    Ping,
    PingOk,
    Shout,
    Whisper,
    Stop,
    Unknown,
}

impl EventKind {
    pub fn parse(event: &str) -> Self {
        match event {
            "JOIN" => EventKind::Join,
            "LEAVE" => EventKind::Leave,
            "ENTER" => EventKind::Enter,
            "EXIT" => EventKind::Exit,
            "HELLO" => EventKind::Hello,
            "PING" => EventKind::Ping,
            "PING_OK" => EventKind::PingOk,
            "SHOUT" => EventKind::Shout,
            "WHISPER" => EventKind::Whisper,
            "STOP" => EventKind::Stop,
            _ => EventKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Join => "JOIN",
            EventKind::Leave => "LEAVE",
            EventKind::Enter => "ENTER",
            EventKind::Exit => "EXIT",
            EventKind::Hello => "HELLO",
            EventKind::Ping => "PING",
            EventKind::PingOk => "PING_OK",
            EventKind::Shout => "SHOUT",
            EventKind::Whisper => "WHISPER",
            EventKind::Stop => "STOP",
            EventKind::Unknown => "UNKNOWN",
        }
    }

    /// 애플리케이션 메시지를 싣는 이벤트인지
    pub fn carries_payload(&self) -> bool {
        matches!(self, EventKind::Shout | EventKind::Whisper)
    }
}

/// 분류에 필요한 노드 정보
#[derive(Debug, Clone, Copy)]
pub struct NodeView<'a> {
    pub node_id: &'a str,
    pub node_name: &'a str,
    pub acknowledge: bool,
    pub message_types: &'a [String],
    pub own_groups: &'a [String],
}

/// 수신 메시지
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub kind: EventKind,
    pub peer_id: String,
    pub peer_name: String,
    /// SHOUT가 도착한 그룹
    pub group: Option<String>,
    /// 원본 바이트
    pub content: Bytes,
    /// 구조화 메시지면 디코딩 결과, 문자열 메시지면 None
    pub envelope: Option<Envelope>,
}

impl InboundMessage {
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

/// 이벤트 처리 방법
#[derive(Debug, Clone)]
pub enum Disposition {
    PeerEntered {
        peer_id: String,
        peer_name: String,
    },
    PeerJoined {
        peer_id: String,
        peer_name: String,
        group: String,
    },
    /// 피어 목록에서만 제거
    PeerExited { peer_id: String },
    /// 처리할 것 없음 (LEAVE, HELLO, PING, PING_OK)
    Ignore(EventKind),
    /// 수신 루프 종료
    Stop,
    /// 알 수 없는 이벤트
    Unknown(String),
    /// 디코딩 실패
    Malformed { peer_id: String },
    /// 추적기로 전달할 ACK
    Acknowledgement {
        msg_id: String,
        peer_id: String,
        peer_name: String,
    },
    /// 애플리케이션 전달
    Deliver {
        message: InboundMessage,
        /// 송신자에게 ACK 전송 필요 여부
        acknowledge: bool,
    },
}

/// 원시 이벤트 분류
pub fn classify(event: RawEvent, view: &NodeView<'_>) -> Disposition {
    let kind = EventKind::parse(&event.event);

    match kind {
        EventKind::Enter => Disposition::PeerEntered {
            peer_id: event.peer_id,
            peer_name: event.peer_name,
        },
        EventKind::Join => Disposition::PeerJoined {
            peer_id: event.peer_id,
            peer_name: event.peer_name,
            group: event.group.unwrap_or_default(),
        },
        EventKind::Exit => Disposition::PeerExited {
            peer_id: event.peer_id,
        },
        EventKind::Leave | EventKind::Hello | EventKind::Ping | EventKind::PingOk => {
            Disposition::Ignore(kind)
        }
        EventKind::Stop => Disposition::Stop,
        EventKind::Unknown => Disposition::Unknown(event.event),
        EventKind::Shout | EventKind::Whisper => classify_message(kind, event, view),
    }
}

fn classify_message(kind: EventKind, event: RawEvent, view: &NodeView<'_>) -> Disposition {
    let envelope = if message::looks_structured(&event.content) {
        match message::decode(&event.content) {
            Some(envelope) => Some(envelope),
            None => {
                return Disposition::Malformed {
                    peer_id: event.peer_id,
                }
            }
        }
    } else {
        None
    };

    if let Some(envelope) = envelope.as_ref().filter(|e| e.is_acknowledgement()) {
        return match envelope.acknowledged_msg_id() {
            Some(msg_id) => Disposition::Acknowledgement {
                msg_id: msg_id.to_string(),
                peer_id: event.peer_id,
                peer_name: event.peer_name,
            },
            None => {
                warn!("receivedMsg 없는 ACK 메시지 ({})", event.peer_name);
                Disposition::Malformed {
                    peer_id: event.peer_id,
                }
            }
        };
    }

    let acknowledge = envelope
        .as_ref()
        .map_or(false, |e| needs_acknowledgement(kind, event.group.as_deref(), e, view));

    Disposition::Deliver {
        message: InboundMessage {
            kind,
            peer_id: event.peer_id,
            peer_name: event.peer_name,
            group: event.group,
            content: event.content,
            envelope,
        },
        acknowledge,
    }
}

/// 수신 메시지에 ACK를 보내야 하는지
///
/// - ACK 활성화
/// - 관심 메시지 타입
/// - SHOUT는 이 노드가 가입한 그룹으로 도착
/// - receiverIds가 있으면 이 노드의 ID 또는 이름 포함
pub fn needs_acknowledgement(
    kind: EventKind,
    group: Option<&str>,
    envelope: &Envelope,
    view: &NodeView<'_>,
) -> bool {
    if !kind.carries_payload() || !view.acknowledge || envelope.is_acknowledgement() {
        return false;
    }

    if !view.message_types.iter().any(|t| t == envelope.msg_type()) {
        return false;
    }

    if kind == EventKind::Shout {
        let member = group.map_or(false, |g| view.own_groups.iter().any(|own| own == g));
        if !member {
            return false;
        }
    }

    !envelope.header.is_addressed() || envelope.header.addresses_any(&[view.node_id, view.node_name])
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        message_types: Vec<String>,
        own_groups: Vec<String>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                message_types: vec!["TASK".into()],
                own_groups: vec!["ROPOD".into()],
            }
        }

        fn view(&self) -> NodeView<'_> {
            NodeView {
                node_id: "b-id",
                node_name: "B",
                acknowledge: true,
                message_types: &self.message_types,
                own_groups: &self.own_groups,
            }
        }
    }

    fn shout(group: &str, envelope: &Envelope) -> RawEvent {
        RawEvent::new("SHOUT", "a-id", "A")
            .in_group(group)
            .with_content(message::encode(envelope).unwrap())
    }

    fn whisper(envelope: &Envelope) -> RawEvent {
        RawEvent::new("WHISPER", "a-id", "A").with_content(message::encode(envelope).unwrap())
    }

    fn acknowledge_flag(disposition: Disposition) -> bool {
        match disposition {
            Disposition::Deliver { acknowledge, .. } => acknowledge,
            other => panic!("unexpected disposition: {:?}", other),
        }
    }

    #[test]
    fn test_event_kind_parse() {
        for kind in [
            EventKind::Join,
            EventKind::Leave,
            EventKind::Enter,
            EventKind::Exit,
            EventKind::Hello,
            EventKind::Ping,
            EventKind::PingOk,
            EventKind::Shout,
            EventKind::Whisper,
            EventKind::Stop,
        ] {
            assert_eq!(EventKind::parse(kind.as_str()), kind);
        }
        assert_eq!(EventKind::parse("EVASIVE"), EventKind::Unknown);
        assert!(EventKind::Whisper.carries_payload());
        assert!(!EventKind::Join.carries_payload());
    }

    #[test]
    fn test_membership_events() {
        let fixture = Fixture::new();
        let view = fixture.view();

        let joined = classify(RawEvent::new("JOIN", "a-id", "A").in_group("ROPOD"), &view);
        assert!(matches!(joined, Disposition::PeerJoined { ref group, .. } if group == "ROPOD"));

        let left = classify(RawEvent::new("LEAVE", "a-id", "A").in_group("ROPOD"), &view);
        assert!(matches!(left, Disposition::Ignore(EventKind::Leave)));

        assert!(matches!(
            classify(RawEvent::new("STOP", "b-id", "B"), &view),
            Disposition::Stop
        ));
        assert!(matches!(
            classify(RawEvent::new("EVASIVE", "a-id", "A"), &view),
            Disposition::Unknown(ref e) if e == "EVASIVE"
        ));
    }

    #[test]
    fn test_shout_on_member_group_is_acknowledged() {
        let fixture = Fixture::new();
        let task = Envelope::new("TASK").with_msg_id("m1");

        assert!(acknowledge_flag(classify(shout("ROPOD", &task), &fixture.view())));
    }

    #[test]
    fn test_shout_on_foreign_group_is_not_acknowledged() {
        let fixture = Fixture::new();
        let task = Envelope::new("TASK").with_msg_id("m1");

        let disposition = classify(shout("OTHER", &task), &fixture.view());
        match disposition {
            Disposition::Deliver { message, acknowledge } => {
                assert!(!acknowledge);
                assert_eq!(message.group.as_deref(), Some("OTHER"));
            }
            other => panic!("unexpected disposition: {:?}", other),
        }
    }

    #[test]
    fn test_receiver_ids_filter() {
        let fixture = Fixture::new();
        let view = fixture.view();

        let by_name = Envelope::new("TASK").with_receivers(["B", "C"]);
        let by_id = Envelope::new("TASK").with_receivers(["b-id"]);
        let other = Envelope::new("TASK").with_receivers(["C"]);

        assert!(acknowledge_flag(classify(whisper(&by_name), &view)));
        assert!(acknowledge_flag(classify(whisper(&by_id), &view)));
        assert!(!acknowledge_flag(classify(whisper(&other), &view)));
    }

    #[test]
    fn test_type_and_switch_filters() {
        let fixture = Fixture::new();
        let pose = Envelope::new("ROBOT-POSE");
        assert!(!acknowledge_flag(classify(whisper(&pose), &fixture.view())));

        let task = Envelope::new("TASK");
        let mut view = fixture.view();
        view.acknowledge = false;
        assert!(!acknowledge_flag(classify(whisper(&task), &view)));
    }

    #[test]
    fn test_empty_msg_id_is_still_acknowledged() {
        let fixture = Fixture::new();
        let anonymous = Envelope::new("TASK").with_msg_id("");

        assert!(acknowledge_flag(classify(whisper(&anonymous), &fixture.view())));
        assert_eq!(
            Envelope::acknowledgement_for(&anonymous).acknowledged_msg_id(),
            Some("")
        );
    }

    #[test]
    fn test_acknowledgement_goes_to_tracker() {
        let mut fixture = Fixture::new();
        // ACK 타입을 관심 목록에 넣어도 ACK에 ACK하지 않음
        fixture.message_types.push(crate::ACKNOWLEDGEMENT_TYPE.into());

        let original = Envelope::new("TASK").with_msg_id("m1");
        let ack = Envelope::acknowledgement_for(&original);

        match classify(whisper(&ack), &fixture.view()) {
            Disposition::Acknowledgement { msg_id, peer_id, peer_name } => {
                assert_eq!(msg_id, "m1");
                assert_eq!((peer_id.as_str(), peer_name.as_str()), ("a-id", "A"));
            }
            other => panic!("unexpected disposition: {:?}", other),
        }
        assert!(!needs_acknowledgement(EventKind::Whisper, None, &ack, &fixture.view()));
    }

    #[test]
    fn test_plain_text_and_malformed() {
        let fixture = Fixture::new();
        let view = fixture.view();

        let text = RawEvent::new("WHISPER", "a-id", "A").with_content(Bytes::from_static(b"hello"));
        match classify(text, &view) {
            Disposition::Deliver { message, acknowledge } => {
                assert!(!acknowledge);
                assert!(message.envelope.is_none());
                assert_eq!(message.text(), Some("hello"));
            }
            other => panic!("unexpected disposition: {:?}", other),
        }

        let broken = RawEvent::new("WHISPER", "a-id", "A").with_content(Bytes::from_static(b"{oops"));
        assert!(matches!(classify(broken, &view), Disposition::Malformed { .. }));
    }
}

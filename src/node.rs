//! 노드 (수신 루프 + 송신 API)
//!
//! - 시작 시 헤더 공개, 그룹 가입, 수신 루프 태스크 생성
//! - 수신 루프: 제어 채널 / 전송 계층 수신 / poll 타임아웃 multiplex
//! - poll 타임아웃마다 재전송 sweep

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::classifier::{classify, Disposition, InboundMessage, NodeView};
use crate::dispatch::{Dispatcher, Outgoing, RecipientSelector};
use crate::stats::DeliveryStats;
use crate::tracker::{AckOutcome, DropReason, PendingDelivery};
use crate::transport::{GroupTransport, RawEvent};
use crate::{Config, Error, Result};

/// 추적 메시지 최종 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// 모든 수신자 ACK
    Acknowledged,
    /// 재시도/기한 초과로 폐기
    Dropped(DropReason),
}

/// 애플리케이션 이벤트
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// 수신 메시지 (SHOUT/WHISPER)
    Message(InboundMessage),
    DeliveryStatus {
        msg_id: String,
        status: DeliveryStatus,
    },
    PeerEntered {
        peer_id: String,
        peer_name: String,
    },
    PeerJoined {
        peer_id: String,
        peer_name: String,
        group: String,
    },
}

/// 애플리케이션 이벤트 수신 채널
pub type NodeEvents = mpsc::Receiver<NodeEvent>;

/// 수신 루프 명령
#[derive(Debug)]
enum NodeCmd {
    /// 즉시 재전송 sweep
    Sweep,
    Stop,
}

/// Ackcast 노드
pub struct Node {
    dispatcher: Arc<Dispatcher>,
    cmd_tx: mpsc::Sender<NodeCmd>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// 노드 시작
    ///
    /// 헤더(name, uuid, 추가 헤더) 공개 후 전송 계층 시작, 그룹 가입
    pub async fn start(
        config: Config,
        transport: Arc<dyn GroupTransport>,
    ) -> Result<(Self, NodeEvents)> {
        transport.set_header("name", &config.node_name);
        transport.set_header("uuid", transport.node_id());
        for (key, value) in &config.extra_headers {
            transport.set_header(key, value);
        }

        transport.start().await?;
        for group in &config.groups {
            transport.join(group).await?;
        }

        info!(
            "노드 시작: {} ({}), groups={:?}, acknowledge={}",
            config.node_name,
            transport.node_id(),
            config.groups,
            config.acknowledge
        );

        let (cmd_tx, cmd_rx) = mpsc::channel::<NodeCmd>(64);
        let (event_tx, event_rx) = mpsc::channel::<NodeEvent>(config.event_buffer_size.max(1));
        let running = Arc::new(AtomicBool::new(true));
        let dispatcher = Arc::new(Dispatcher::new(config, transport));

        let receive_loop = ReceiveLoop {
            dispatcher: dispatcher.clone(),
            events: event_tx,
            running: running.clone(),
        };
        let task = tokio::spawn(receive_loop.run(cmd_rx));

        let node = Self {
            dispatcher,
            cmd_tx,
            running,
            task: Mutex::new(Some(task)),
        };

        Ok((node, event_rx))
    }

    /// 그룹에 전송 (None이면 가입한 모든 그룹)
    pub async fn shout(
        &self,
        message: impl Into<Outgoing>,
        groups: Option<Vec<String>>,
    ) -> Result<()> {
        self.dispatcher.shout(message, groups).await
    }

    /// 피어에 전송
    pub async fn whisper(
        &self,
        message: impl Into<Outgoing>,
        selector: Option<RecipientSelector>,
    ) -> Result<()> {
        self.dispatcher.whisper(message, selector).await
    }

    pub async fn join(&self, group: &str) -> Result<()> {
        self.dispatcher.transport().join(group).await
    }

    pub async fn leave(&self, group: &str) -> Result<()> {
        self.dispatcher.transport().leave(group).await
    }

    /// poll 타임아웃을 기다리지 않고 재전송 sweep 요청
    pub async fn sweep_now(&self) -> Result<()> {
        self.cmd_tx
            .send(NodeCmd::Sweep)
            .await
            .map_err(|_| Error::ChannelError)
    }

    /// 노드 종료
    ///
    /// 수신 루프 종료 후 그룹 탈퇴, 전송 계층 종료
    /// 미확인 메시지 추적은 폐기 (보고하지 않음)
    pub async fn stop(&self) -> Result<()> {
        let _ = self.cmd_tx.send(NodeCmd::Stop).await;
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("수신 루프 태스크 에러: {}", e);
            }
        }
        self.running.store(false, Ordering::SeqCst);

        let transport = self.dispatcher.transport();
        for group in transport.own_groups() {
            if let Err(e) = transport.leave(&group).await {
                warn!("그룹 탈퇴 실패 ({}): {}", group, e);
            }
        }
        transport.stop().await?;

        let abandoned = self.dispatcher.tracker().lock().clear();
        if abandoned > 0 {
            info!("미확인 메시지 {}개 추적 중단", abandoned);
        }

        info!("노드 종료: {}", self.node_name());
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn node_id(&self) -> &str {
        self.dispatcher.transport().node_id()
    }

    pub fn node_name(&self) -> &str {
        self.dispatcher.transport().node_name()
    }

    pub fn config(&self) -> &Config {
        self.dispatcher.config()
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> DeliveryStats {
        self.dispatcher.stats().read().clone()
    }

    /// ACK 대기 중인 메시지
    pub fn pending(&self, msg_id: &str) -> Option<PendingDelivery> {
        self.dispatcher.tracker().lock().get(msg_id).cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.dispatcher.tracker().lock().len()
    }

    /// 알려진 피어 (ID, 이름)
    pub fn peers(&self) -> Vec<(String, String)> {
        self.dispatcher.peers().snapshot()
    }
}

/// 수신 루프
struct ReceiveLoop {
    dispatcher: Arc<Dispatcher>,
    events: mpsc::Sender<NodeEvent>,
    running: Arc<AtomicBool>,
}

impl ReceiveLoop {
    async fn run(self, mut cmd_rx: mpsc::Receiver<NodeCmd>) {
        let transport = self.dispatcher.transport().clone();
        let poll_timeout = self.dispatcher.config().poll_timeout();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(NodeCmd::Sweep) => self.sweep().await,
                        Some(NodeCmd::Stop) | None => break,
                    }
                }
                result = transport.recv() => {
                    match result {
                        Ok(event) => {
                            if self.handle_event(event).await.is_break() {
                                break;
                            }
                        }
                        Err(Error::ConnectionClosed) => {
                            warn!("전송 계층 연결 종료");
                            break;
                        }
                        Err(e) => {
                            warn!("수신 에러: {}", e);
                        }
                    }
                }
                _ = tokio::time::sleep(poll_timeout) => {
                    if self.dispatcher.config().acknowledge {
                        self.sweep().await;
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("수신 루프 종료: {}", transport.node_name());
    }

    async fn handle_event(&self, event: RawEvent) -> ControlFlow<()> {
        let config = self.dispatcher.config();
        let transport = self.dispatcher.transport();

        if config.verbose {
            info!(
                "이벤트 수신: {} from {} ({}) group={:?} {} bytes",
                event.event,
                event.peer_name,
                event.peer_id,
                event.group,
                event.content.len()
            );
        }

        let disposition = {
            let own_groups = transport.own_groups();
            let view = NodeView {
                node_id: transport.node_id(),
                node_name: transport.node_name(),
                acknowledge: config.acknowledge,
                message_types: &config.message_types,
                own_groups: &own_groups,
            };
            classify(event, &view)
        };

        match disposition {
            Disposition::PeerEntered { peer_id, peer_name } => {
                debug!("피어 입장: {} ({})", peer_name, peer_id);
                self.dispatcher.peers().insert(&peer_id, &peer_name);
                self.emit(NodeEvent::PeerEntered { peer_id, peer_name }).await;
            }
            Disposition::PeerJoined {
                peer_id,
                peer_name,
                group,
            } => {
                debug!("피어 그룹 가입: {} → {}", peer_name, group);
                self.dispatcher.peers().insert(&peer_id, &peer_name);
                self.emit(NodeEvent::PeerJoined {
                    peer_id,
                    peer_name,
                    group,
                })
                .await;
            }
            Disposition::PeerExited { peer_id } => {
                if let Some(name) = self.dispatcher.peers().remove(&peer_id) {
                    debug!("피어 퇴장: {} ({})", name, peer_id);
                }
            }
            Disposition::Ignore(kind) => {
                debug!("이벤트 무시: {}", kind.as_str());
            }
            Disposition::Stop => {
                info!("STOP 이벤트 수신");
                return ControlFlow::Break(());
            }
            Disposition::Unknown(event) => {
                warn!("알 수 없는 이벤트: {}", event);
                self.dispatcher.stats().write().unknown_events += 1;
            }
            Disposition::Malformed { peer_id } => {
                warn!("디코딩 불가 메시지 폐기 ({})", peer_id);
                self.dispatcher.stats().write().decode_failures += 1;
            }
            Disposition::Acknowledgement {
                msg_id,
                peer_id,
                peer_name,
            } => {
                self.handle_acknowledgement(msg_id, &peer_id, &peer_name).await;
            }
            Disposition::Deliver {
                message,
                acknowledge,
            } => {
                if acknowledge {
                    if let Some(envelope) = &message.envelope {
                        if let Err(e) = self
                            .dispatcher
                            .send_acknowledgement(envelope, &message.peer_id)
                            .await
                        {
                            warn!("ACK 전송 실패 ({}): {}", message.peer_name, e);
                        }
                    }
                }

                self.dispatcher.stats().write().messages_received += 1;
                self.emit(NodeEvent::Message(message)).await;
            }
        }

        ControlFlow::Continue(())
    }

    /// ACK 수신: 송신자 ID, 다음으로 이름으로 대조
    async fn handle_acknowledgement(&self, msg_id: String, peer_id: &str, peer_name: &str) {
        self.dispatcher.stats().write().record_ack();

        let outcome = {
            let mut tracker = self.dispatcher.tracker().lock();
            match tracker.acknowledge(&msg_id, peer_id) {
                AckOutcome::NotARecipient => tracker.acknowledge(&msg_id, peer_name),
                outcome => outcome,
            }
        };

        match outcome {
            AckOutcome::Completed => {
                info!("전달 완료: msgId={}", msg_id);
                self.dispatcher.stats().write().delivered += 1;
                self.emit(NodeEvent::DeliveryStatus {
                    msg_id,
                    status: DeliveryStatus::Acknowledged,
                })
                .await;
            }
            AckOutcome::Partial { remaining } => {
                debug!(
                    "ACK 수신: msgId={} from {}, 남은 수신자 {}",
                    msg_id, peer_name, remaining
                );
            }
            AckOutcome::NotARecipient => {
                debug!("수신 대상이 아닌 피어의 ACK: msgId={} from {}", msg_id, peer_name);
            }
            AckOutcome::Untracked => {
                debug!("추적 중이 아닌 메시지의 ACK: msgId={}", msg_id);
            }
        }
    }

    /// 재전송 sweep
    ///
    /// 추적기 락은 대상 선별에만 사용, 재등록/백오프 예약은 `Dispatcher::replay`
    async fn sweep(&self) {
        let outcome = self.dispatcher.tracker().lock().sweep(Instant::now());

        for (msg_id, args) in &outcome.retries {
            self.dispatcher.replay(msg_id, args).await;
        }

        for dropped in outcome.dropped {
            self.dispatcher.stats().write().dropped += 1;
            debug!(
                "폐기: msgId={}, reason={:?}, unacknowledged={:?}",
                dropped.msg_id, dropped.reason, dropped.unacknowledged
            );
            self.emit(NodeEvent::DeliveryStatus {
                msg_id: dropped.msg_id,
                status: DeliveryStatus::Dropped(dropped.reason),
            })
            .await;
        }
    }

    async fn emit(&self, event: NodeEvent) {
        let _ = self.events.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::message::{self, Envelope};
    use crate::transport::{MemoryHub, MemoryTransport};

    fn config(name: &str, id: &str) -> Config {
        let mut config = Config::new(name);
        config.node_id = Some(id.to_string());
        config.acknowledge = true;
        config.message_types = vec!["TASK".into()];
        config
    }

    async fn bare(hub: &MemoryHub, name: &str, id: &str) -> MemoryTransport {
        let transport = hub.transport_with_id(name, id);
        transport.start().await.unwrap();
        transport
    }

    async fn next_event(transport: &MemoryTransport, kind: &str) -> RawEvent {
        loop {
            let event = transport.recv().await.unwrap();
            if event.event == kind {
                return event;
            }
        }
    }

    async fn wait_for_peers(events: &mut NodeEvents, count: usize) {
        let mut seen = 0;
        while seen < count {
            if let Some(NodeEvent::PeerEntered { .. }) = events.recv().await {
                seen += 1;
            }
        }
    }

    async fn wait_for_status(events: &mut NodeEvents, id: &str) -> DeliveryStatus {
        loop {
            match events.recv().await {
                Some(NodeEvent::DeliveryStatus { msg_id, status }) if msg_id == id => {
                    return status;
                }
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    }

    #[tokio::test]
    async fn test_start_publishes_headers() {
        let hub = MemoryHub::new();
        let mut config = config("A", "a-id");
        config.groups = vec!["ROPOD".into()];
        config
            .extra_headers
            .insert("role".into(), "robot".into());

        let transport = Arc::new(hub.transport(&config));
        let (node, _events) = Node::start(config, transport.clone()).await.unwrap();

        assert_eq!(transport.header("name").as_deref(), Some("A"));
        assert_eq!(transport.header("uuid").as_deref(), Some("a-id"));
        assert_eq!(transport.header("role").as_deref(), Some("robot"));
        assert_eq!(transport.own_groups(), vec!["ROPOD".to_string()]);
        assert!(node.is_running());

        node.stop().await.unwrap();
        assert!(!node.is_running());
        assert!(transport.own_groups().is_empty());
        assert_eq!(hub.peer_count(), 0);

        // 두 번째 stop은 무시
        node.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_acknowledgement_then_drop() {
        let hub = MemoryHub::new();
        let mut config = config("A", "a-id");
        config.max_retries = 2;

        let (node, mut events) = Node::start(config, Arc::new(hub.transport_with_id("A", "a-id")))
            .await
            .unwrap();
        let b = bare(&hub, "B", "b-id").await;
        let c = bare(&hub, "C", "c-id").await;
        wait_for_peers(&mut events, 2).await;

        let m1 = Envelope::new("TASK").with_msg_id("m1").with_receivers(["B", "C"]);
        let selector = RecipientSelector::ManyNames(vec!["B".into(), "C".into()]);
        node.whisper(m1, Some(selector)).await.unwrap();
        let sent_at = Instant::now();

        // B는 1초 후 ACK
        let received = next_event(&b, "WHISPER").await;
        let original = message::decode(&received.content).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let ack = message::encode(&Envelope::acknowledgement_for(&original)).unwrap();
        b.whisper("a-id", ack).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let pending = node.pending("m1").unwrap();
        assert_eq!(pending.retry_count, 0);
        assert_eq!(
            pending.remaining_recipients.into_iter().collect::<Vec<_>>(),
            vec!["C".to_string()]
        );

        // C는 끝까지 ACK하지 않음: 최초 송신
        next_event(&c, "WHISPER").await;

        // 첫 재전송: 재등록 +1, 백오프 예약 +1
        next_event(&c, "WHISPER").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let pending = node.pending("m1").unwrap();
        assert_eq!(pending.retry_count, 2);
        assert_eq!(pending.backoff, Duration::from_secs(5));
        assert_eq!(node.stats().retries, 1);

        // 두 번째 재전송 직후, 마지막 sweep 전까지는 C 대기 유지
        next_event(&c, "WHISPER").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let pending = node.pending("m1").unwrap();
        assert_eq!(pending.retry_count, 4);
        assert_eq!(
            pending.remaining_recipients.into_iter().collect::<Vec<_>>(),
            vec!["C".to_string()]
        );
        assert_eq!(node.stats().retries, 2);
        assert!(sent_at.elapsed() >= Duration::from_secs(10));

        // 다음 poll sweep에서 폐기 (백오프 125초를 기다리지 않음)
        let status = tokio::time::timeout(Duration::from_secs(2), wait_for_status(&mut events, "m1"))
            .await
            .unwrap();
        assert_eq!(status, DeliveryStatus::Dropped(DropReason::RetriesExhausted));
        assert!(node.pending("m1").is_none());
        assert!(sent_at.elapsed() < Duration::from_secs(20));

        let stats = node.stats();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.acks_received, 1);

        // 최초 1회 + 재전송 2회 이후 추가 송신 없음
        let mut extra = 0;
        while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(1), c.recv()).await {
            if event.event == "WHISPER" {
                extra += 1;
            }
        }
        assert_eq!(extra, 0);

        node.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_acknowledgement() {
        let hub = MemoryHub::new();

        let mut a_config = config("A", "a-id");
        a_config.groups = vec!["ROPOD".into()];
        let mut b_config = config("B", "b-id");
        b_config.groups = vec!["ROPOD".into()];

        let (a, mut a_events) = Node::start(a_config, Arc::new(hub.transport_with_id("A", "a-id")))
            .await
            .unwrap();
        let (b, mut b_events) = Node::start(b_config, Arc::new(hub.transport_with_id("B", "b-id")))
            .await
            .unwrap();
        wait_for_peers(&mut a_events, 1).await;

        let task = Envelope::new("TASK").with_msg_id("t1").with_field("area", "AMK");
        a.shout(task, None).await.unwrap();

        let status = tokio::time::timeout(Duration::from_secs(10), wait_for_status(&mut a_events, "t1"))
            .await
            .unwrap();
        assert_eq!(status, DeliveryStatus::Acknowledged);
        assert_eq!(a.pending_count(), 0);
        assert_eq!(a.stats().delivered, 1);

        let delivered = loop {
            if let Some(NodeEvent::Message(message)) = b_events.recv().await {
                break message;
            }
        };
        let envelope = delivered.envelope.unwrap();
        assert_eq!(envelope.msg_id(), "t1");
        assert_eq!(envelope.payload["area"], "AMK");
        assert_eq!(delivered.group.as_deref(), Some("ROPOD"));
        assert_eq!(b.stats().acks_sent, 1);
        assert_eq!(b.peers(), vec![("a-id".to_string(), "A".to_string())]);

        a.stop().await.unwrap();
        b.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_event_ends_loop() {
        let hub = MemoryHub::new();
        let transport = Arc::new(hub.transport_with_id("A", "a-id"));
        let (node, _events) = Node::start(config("A", "a-id"), transport.clone())
            .await
            .unwrap();

        // 전송 계층이 직접 종료되면 STOP 이벤트로 루프 종료
        transport.stop().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while node.is_running() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    /// 이벤트 주입/송신 기록용 전송 계층
    struct ScriptedTransport {
        inject: tokio::sync::mpsc::UnboundedSender<RawEvent>,
        rx: Mutex<tokio::sync::mpsc::UnboundedReceiver<RawEvent>>,
        groups: parking_lot::Mutex<Vec<String>>,
        whispers: parking_lot::Mutex<Vec<(String, Bytes)>>,
    }

    impl ScriptedTransport {
        fn new() -> Self {
            let (inject, rx) = tokio::sync::mpsc::unbounded_channel();
            Self {
                inject,
                rx: Mutex::new(rx),
                groups: parking_lot::Mutex::new(Vec::new()),
                whispers: parking_lot::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GroupTransport for ScriptedTransport {
        fn node_id(&self) -> &str {
            "a-id"
        }

        fn node_name(&self) -> &str {
            "A"
        }

        fn own_groups(&self) -> Vec<String> {
            self.groups.lock().clone()
        }

        fn set_header(&self, _key: &str, _value: &str) {}

        async fn start(&self) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }

        async fn join(&self, group: &str) -> Result<()> {
            self.groups.lock().push(group.to_string());
            Ok(())
        }

        async fn leave(&self, group: &str) -> Result<()> {
            self.groups.lock().retain(|g| g != group);
            Ok(())
        }

        async fn shout(&self, _group: &str, _content: Bytes) -> Result<()> {
            Ok(())
        }

        async fn whisper(&self, peer_id: &str, content: Bytes) -> Result<()> {
            self.whispers.lock().push((peer_id.to_string(), content));
            Ok(())
        }

        async fn recv(&self) -> Result<RawEvent> {
            let event = self.rx.lock().await.recv().await.ok_or(Error::ConnectionClosed)?;
            if event.event == "CRASH" {
                panic!("scripted transport crash");
            }
            Ok(event)
        }
    }

    async fn collect_messages(events: &mut NodeEvents, count: usize) -> Vec<InboundMessage> {
        let mut messages = Vec::new();
        while messages.len() < count {
            if let Some(NodeEvent::Message(message)) = events.recv().await {
                messages.push(message);
            }
        }
        messages
    }

    #[tokio::test]
    async fn test_shout_on_foreign_group_is_not_acknowledged() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut config = config("A", "a-id");
        config.groups = vec!["ROPOD".into()];
        let (node, mut events) = Node::start(config, transport.clone()).await.unwrap();

        let foreign = Envelope::new("TASK").with_msg_id("f1");
        let member = Envelope::new("TASK").with_msg_id("r1");
        for (group, envelope) in [("OTHER", &foreign), ("ROPOD", &member)] {
            let event = RawEvent::new("SHOUT", "z-id", "Z")
                .in_group(group)
                .with_content(message::encode(envelope).unwrap());
            transport.inject.send(event).unwrap();
        }

        let messages = collect_messages(&mut events, 2).await;
        assert_eq!(messages[0].group.as_deref(), Some("OTHER"));
        assert_eq!(messages[1].group.as_deref(), Some("ROPOD"));

        let whispers = transport.whispers.lock().clone();
        assert_eq!(whispers.len(), 1);
        assert_eq!(whispers[0].0, "z-id");
        let ack = message::decode(&whispers[0].1).unwrap();
        assert_eq!(ack.acknowledged_msg_id(), Some("r1"));

        node.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_faults_are_counted_and_loop_continues() {
        let transport = Arc::new(ScriptedTransport::new());
        let (node, mut events) = Node::start(config("A", "a-id"), transport.clone())
            .await
            .unwrap();

        let inject = |event: RawEvent| transport.inject.send(event).unwrap();
        inject(RawEvent::new("EVASIVE", "z-id", "Z"));
        inject(RawEvent::new("WHISPER", "z-id", "Z").with_content(Bytes::from_static(b"{broken")));
        inject(RawEvent::new("WHISPER", "z-id", "Z").with_content(Bytes::from_static(b"plain text")));

        let messages = collect_messages(&mut events, 1).await;
        assert_eq!(messages[0].text(), Some("plain text"));
        assert!(messages[0].envelope.is_none());

        let stats = node.stats();
        assert_eq!(stats.unknown_events, 1);
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.messages_received, 1);
        assert!(transport.whispers.lock().is_empty());
        assert!(node.is_running());

        node.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_after_receive_loop_panic() {
        let transport = Arc::new(ScriptedTransport::new());
        let (node, mut events) = Node::start(config("A", "a-id"), transport.clone())
            .await
            .unwrap();

        transport.inject.send(RawEvent::new("CRASH", "z-id", "Z")).unwrap();

        // 루프가 죽으면 이벤트 채널이 닫힘
        tokio::time::timeout(Duration::from_secs(5), async {
            while events.recv().await.is_some() {}
        })
        .await
        .unwrap();
        assert!(node.is_running());

        // JoinError는 로그만 남기고 종료 절차 계속
        node.stop().await.unwrap();
        assert!(!node.is_running());
        assert!(transport.own_groups().is_empty());
        assert_eq!(node.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_now_replays_due_message() {
        let transport = Arc::new(ScriptedTransport::new());
        let (node, _events) = Node::start(config("A", "a-id"), transport.clone())
            .await
            .unwrap();

        let task = Envelope::new("TASK").with_msg_id("m1");
        node.whisper(task, Some(RecipientSelector::Single("z-id".into())))
            .await
            .unwrap();
        assert_eq!(transport.whispers.lock().len(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        node.sweep_now().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(transport.whispers.lock().len(), 2);
        assert_eq!(node.pending("m1").unwrap().retry_count, 2);

        node.stop().await.unwrap();
    }
}

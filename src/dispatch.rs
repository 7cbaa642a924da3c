//! 송신 경로 (shout / whisper)
//!
//! - ACK 대상이면 전송 전에 추적기에 등록
//! - 봉투는 한 번만 인코딩, 여러 대상에 간격을 두고 전송
//! - 이름 → ID 변환은 `PeerDirectory`

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::message::{self, Envelope};
use crate::stats::DeliveryStats;
use crate::tracker::{AckTracker, ResendArgs, ResendTarget};
use crate::transport::GroupTransport;
use crate::{Config, Error, Result};

/// whisper 수신자 지정
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientSelector {
    /// 피어 ID 하나
    Single(String),
    /// 피어 ID 여러 개
    Many(Vec<String>),
    /// 피어 이름 하나
    SingleName(String),
    /// 피어 이름 여러 개
    ManyNames(Vec<String>),
}

/// 송신 메시지
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// 봉투 (인코딩 후 전송, ACK 추적 가능)
    Structured(Envelope),
    /// 문자열 그대로 전송
    Text(String),
}

impl From<Envelope> for Outgoing {
    fn from(envelope: Envelope) -> Self {
        Outgoing::Structured(envelope)
    }
}

impl From<String> for Outgoing {
    fn from(text: String) -> Self {
        Outgoing::Text(text)
    }
}

impl From<&str> for Outgoing {
    fn from(text: &str) -> Self {
        Outgoing::Text(text.to_string())
    }
}

/// 피어 ID → 이름
///
/// ENTER/JOIN 이벤트로 채워짐
#[derive(Debug, Default)]
pub struct PeerDirectory {
    names: DashMap<String, String>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 새 피어면 true
    pub fn insert(&self, peer_id: &str, peer_name: &str) -> bool {
        self.names
            .insert(peer_id.to_string(), peer_name.to_string())
            .is_none()
    }

    pub fn remove(&self, peer_id: &str) -> Option<String> {
        self.names.remove(peer_id).map(|(_, name)| name)
    }

    pub fn name_of(&self, peer_id: &str) -> Option<String> {
        self.names.get(peer_id).map(|entry| entry.value().clone())
    }

    /// 이름으로 ID 조회
    pub fn resolve(&self, peer_name: &str) -> Option<String> {
        self.names
            .iter()
            .find(|entry| entry.value() == peer_name)
            .map(|entry| entry.key().clone())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// (ID, 이름) 목록, ID 순
    pub fn snapshot(&self) -> Vec<(String, String)> {
        let mut peers: Vec<_> = self
            .names
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        peers.sort();
        peers
    }
}

/// 송신기
pub struct Dispatcher {
    config: Config,
    transport: Arc<dyn GroupTransport>,
    tracker: Arc<Mutex<AckTracker>>,
    peers: Arc<PeerDirectory>,
    stats: Arc<RwLock<DeliveryStats>>,
}

impl Dispatcher {
    pub fn new(config: Config, transport: Arc<dyn GroupTransport>) -> Self {
        let tracker = AckTracker::new(config.retry_policy());

        Self {
            config,
            transport,
            tracker: Arc::new(Mutex::new(tracker)),
            peers: Arc::new(PeerDirectory::new()),
            stats: Arc::new(RwLock::new(DeliveryStats::new())),
        }
    }

    /// 그룹에 전송
    ///
    /// `groups`가 None이면 가입한 모든 그룹
    pub async fn shout(
        &self,
        message: impl Into<Outgoing>,
        groups: Option<Vec<String>>,
    ) -> Result<()> {
        let message = message.into();
        let content = Self::encode(&message)?;

        if let Outgoing::Structured(envelope) = &message {
            self.track(envelope, ResendTarget::Groups(groups.clone()));
        }

        self.shout_bytes(content, groups).await;
        Ok(())
    }

    /// 피어에 전송
    ///
    /// 수신자 미지정이면 아무것도 보내지 않고 `Error::NoRecipient`
    pub async fn whisper(
        &self,
        message: impl Into<Outgoing>,
        selector: Option<RecipientSelector>,
    ) -> Result<()> {
        let Some(selector) = selector else {
            warn!("whisper 수신자 미지정, 전송 취소");
            return Err(Error::NoRecipient);
        };

        let message = message.into();
        let content = Self::encode(&message)?;

        if let Outgoing::Structured(envelope) = &message {
            self.track(envelope, ResendTarget::Peers(selector.clone()));
        }

        self.whisper_bytes(content, &selector).await;
        Ok(())
    }

    /// 수신자 지정을 피어 ID 목록으로 변환
    ///
    /// 찾지 못한 이름은 경고 후 제외
    pub fn resolve(&self, selector: &RecipientSelector) -> Vec<String> {
        let names = match selector {
            RecipientSelector::Single(id) => return vec![id.clone()],
            RecipientSelector::Many(ids) => return ids.clone(),
            RecipientSelector::SingleName(name) => std::slice::from_ref(name),
            RecipientSelector::ManyNames(names) => names.as_slice(),
        };

        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            match self.peers.resolve(name) {
                Some(id) => ids.push(id),
                None => {
                    warn!("알 수 없는 피어 이름, 건너뜀: {}", name);
                    self.stats.write().unresolved_peers += 1;
                }
            }
        }
        ids
    }

    /// 추적 대상이면 등록
    fn track(&self, envelope: &Envelope, target: ResendTarget) {
        if !self.config.acknowledge
            || envelope.is_acknowledgement()
            || !self.config.is_message_type_of_interest(envelope.msg_type())
        {
            return;
        }

        if envelope.msg_id().is_empty() {
            warn!("msgId 없는 메시지는 추적 불가: type={}", envelope.msg_type());
            return;
        }

        let args = ResendArgs {
            envelope: envelope.clone(),
            target,
        };
        let kind = args.kind();

        let fresh = self.tracker.lock().register_for_retry(
            envelope.msg_id(),
            kind,
            &envelope.header.receiver_ids,
            args,
            Instant::now(),
        );

        if fresh {
            self.stats.write().tracked += 1;
        }
    }

    fn encode(outgoing: &Outgoing) -> Result<Bytes> {
        match outgoing {
            Outgoing::Structured(envelope) => message::encode(envelope),
            Outgoing::Text(text) => Ok(message::raw_bytes(text)),
        }
    }

    async fn shout_bytes(&self, content: Bytes, groups: Option<Vec<String>>) {
        let groups = groups.unwrap_or_else(|| self.transport.own_groups());
        if groups.is_empty() {
            debug!("shout 대상 그룹 없음");
            return;
        }

        for (i, group) in groups.iter().enumerate() {
            if i > 0 {
                self.pace().await;
            }

            match self.transport.shout(group, content.clone()).await {
                Ok(()) => self.stats.write().shouts += 1,
                Err(e) => {
                    warn!("shout 실패 ({}): {}", group, e);
                    self.stats.write().send_failures += 1;
                }
            }
        }
    }

    async fn whisper_bytes(&self, content: Bytes, selector: &RecipientSelector) {
        let peer_ids = self.resolve(selector);

        for (i, peer_id) in peer_ids.iter().enumerate() {
            if i > 0 {
                self.pace().await;
            }

            match self.transport.whisper(peer_id, content.clone()).await {
                Ok(()) => self.stats.write().whispers += 1,
                Err(e) => {
                    warn!("whisper 실패 ({}): {}", peer_id, e);
                    self.stats.write().send_failures += 1;
                }
            }
        }
    }

    async fn pace(&self) {
        let pacing = self.config.send_pacing();
        if !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }
    }

    /// 추적 중인 메시지 재전송
    ///
    /// 원본 송신과 같은 경로: 재등록(`register_for_retry`) 후 송신, 이어서 `advance_retry`
    /// 그 사이 ACK로 추적이 끝났으면 보내지 않고 false
    pub(crate) async fn replay(&self, msg_id: &str, args: &ResendArgs) -> bool {
        let content = match message::encode(&args.envelope) {
            Ok(content) => content,
            Err(e) => {
                warn!("재전송 인코딩 실패: msgId={}, {}", msg_id, e);
                return false;
            }
        };

        {
            let mut tracker = self.tracker.lock();
            if !tracker.contains(msg_id) {
                debug!("이미 추적 종료, 재전송 생략: msgId={}", msg_id);
                return false;
            }
            tracker.register_for_retry(
                msg_id,
                args.kind(),
                &args.envelope.header.receiver_ids,
                args.clone(),
                Instant::now(),
            );
        }

        info!("재전송: msgId={}, kind={:?}", msg_id, args.kind());
        self.stats.write().retries += 1;

        match &args.target {
            ResendTarget::Groups(groups) => self.shout_bytes(content, groups.clone()).await,
            ResendTarget::Peers(selector) => self.whisper_bytes(content, selector).await,
        }

        self.tracker.lock().advance_retry(msg_id, Instant::now());
        true
    }

    /// 수신 메시지에 대한 ACK 전송 (추적하지 않음)
    pub(crate) async fn send_acknowledgement(&self, original: &Envelope, peer_id: &str) -> Result<()> {
        let ack = Envelope::acknowledgement_for(original);
        let content = message::encode(&ack)?;

        self.transport.whisper(peer_id, content).await?;
        self.stats.write().acks_sent += 1;

        debug!("ACK 전송: msgId={} → {}", original.msg_id(), peer_id);
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn GroupTransport> {
        &self.transport
    }

    pub fn tracker(&self) -> &Arc<Mutex<AckTracker>> {
        &self.tracker
    }

    pub fn peers(&self) -> &Arc<PeerDirectory> {
        &self.peers
    }

    pub fn stats(&self) -> &Arc<RwLock<DeliveryStats>> {
        &self.stats
    }
}

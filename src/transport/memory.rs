//! 프로세스 내 전송 계층
//!
//! 같은 `MemoryHub`에 연결된 전송끼리만 통신 (테스트/데모용)
//! 이벤트 이름과 순서는 실제 그룹 메시징 전송 계층과 동일하게 생성
//! - start: 기존 피어의 ENTER/JOIN 수신, 다른 피어에게 ENTER 전달
//! - stop: 다른 피어에게 EXIT, 자신에게 STOP

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

use super::{GroupTransport, RawEvent};
use crate::{Config, Error, Result};

/// 허브에 등록된 피어
struct PeerSlot {
    name: String,
    groups: Arc<RwLock<BTreeSet<String>>>,
    headers: HashMap<String, String>,
    inbox: mpsc::UnboundedSender<RawEvent>,
}

/// 메모리 허브
#[derive(Clone, Default)]
pub struct MemoryHub {
    peers: Arc<DashMap<String, PeerSlot>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 설정의 이름/ID로 전송 생성
    pub fn transport(&self, config: &Config) -> MemoryTransport {
        if let Some(interface) = &config.interface {
            debug!("메모리 전송은 인터페이스 설정 무시: {}", interface);
        }

        let id = config
            .node_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string().to_uppercase());

        self.transport_with_id(&config.node_name, &id)
    }

    pub fn transport_with_id(&self, name: &str, id: &str) -> MemoryTransport {
        let (inbox, rx) = mpsc::unbounded_channel();

        MemoryTransport {
            hub: self.clone(),
            id: id.to_string(),
            name: name.to_string(),
            inbox,
            rx: Mutex::new(rx),
            headers: RwLock::new(HashMap::new()),
            groups: Arc::new(RwLock::new(BTreeSet::new())),
            started: AtomicBool::new(false),
        }
    }

    /// 시작된 피어 수
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// `from`을 제외한 모든 피어에게 전달
    fn broadcast(&self, from: &str, event: &RawEvent) {
        for slot in self.peers.iter() {
            if slot.key() != from {
                let _ = slot.inbox.send(event.clone());
            }
        }
    }
}

/// 메모리 전송
pub struct MemoryTransport {
    hub: MemoryHub,
    id: String,
    name: String,
    inbox: mpsc::UnboundedSender<RawEvent>,
    rx: Mutex<mpsc::UnboundedReceiver<RawEvent>>,
    headers: RwLock<HashMap<String, String>>,
    groups: Arc<RwLock<BTreeSet<String>>>,
    started: AtomicBool,
}

impl MemoryTransport {
    fn ensure_started(&self) -> Result<()> {
        if self.started.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Transport(format!("전송 계층 미시작: {}", self.name)))
        }
    }

    fn event(&self, event: &str) -> RawEvent {
        RawEvent::new(event, self.id.as_str(), self.name.as_str())
    }

    /// 공개된 헤더
    pub fn header(&self, key: &str) -> Option<String> {
        self.headers.read().get(key).cloned()
    }
}

#[async_trait]
impl GroupTransport for MemoryTransport {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn node_name(&self) -> &str {
        &self.name
    }

    fn own_groups(&self) -> Vec<String> {
        self.groups.read().iter().cloned().collect()
    }

    fn set_header(&self, key: &str, value: &str) {
        self.headers.write().insert(key.to_string(), value.to_string());
    }

    async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted {
                name: self.name.clone(),
            });
        }

        // 기존 피어 정보 수신
        for slot in self.hub.peers.iter() {
            let enter = RawEvent::new("ENTER", slot.key().as_str(), slot.name.as_str())
                .with_headers(slot.headers.clone());
            let _ = self.inbox.send(enter);

            for group in slot.groups.read().iter() {
                let join = RawEvent::new("JOIN", slot.key().as_str(), slot.name.as_str())
                    .in_group(group.as_str());
                let _ = self.inbox.send(join);
            }
        }

        let headers = self.headers.read().clone();
        self.hub
            .broadcast(&self.id, &self.event("ENTER").with_headers(headers.clone()));
        for group in self.groups.read().iter() {
            self.hub
                .broadcast(&self.id, &self.event("JOIN").in_group(group.as_str()));
        }

        self.hub.peers.insert(
            self.id.clone(),
            PeerSlot {
                name: self.name.clone(),
                groups: self.groups.clone(),
                headers,
                inbox: self.inbox.clone(),
            },
        );

        debug!("메모리 전송 시작: {} ({})", self.name, self.id);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.hub.peers.remove(&self.id);
        self.hub.broadcast(&self.id, &self.event("EXIT"));
        let _ = self.inbox.send(self.event("STOP"));

        debug!("메모리 전송 종료: {}", self.name);
        Ok(())
    }

    async fn join(&self, group: &str) -> Result<()> {
        let inserted = self.groups.write().insert(group.to_string());

        if inserted && self.started.load(Ordering::SeqCst) {
            self.hub.broadcast(&self.id, &self.event("JOIN").in_group(group));
        }
        Ok(())
    }

    async fn leave(&self, group: &str) -> Result<()> {
        let removed = self.groups.write().remove(group);

        if removed && self.started.load(Ordering::SeqCst) {
            self.hub.broadcast(&self.id, &self.event("LEAVE").in_group(group));
        }
        Ok(())
    }

    async fn shout(&self, group: &str, content: Bytes) -> Result<()> {
        self.ensure_started()?;

        let event = self.event("SHOUT").in_group(group).with_content(content);
        for slot in self.hub.peers.iter() {
            if slot.key() != &self.id && slot.groups.read().contains(group) {
                let _ = slot.inbox.send(event.clone());
            }
        }
        Ok(())
    }

    async fn whisper(&self, peer_id: &str, content: Bytes) -> Result<()> {
        self.ensure_started()?;

        let slot = self.hub.peers.get(peer_id).ok_or_else(|| Error::UnknownPeer {
            peer: peer_id.to_string(),
        })?;

        slot.inbox
            .send(self.event("WHISPER").with_content(content))
            .map_err(|_| Error::Transport(format!("피어 수신함 닫힘: {}", peer_id)))
    }

    async fn recv(&self) -> Result<RawEvent> {
        self.rx.lock().await.recv().await.ok_or(Error::ConnectionClosed)
    }
}

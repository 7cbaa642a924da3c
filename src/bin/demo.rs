//! Ackcast 데모
//!
//! 메모리 허브 위에서 ACK 재전송 흐름 재현
//! 1. node1이 node2, node3 앞으로 TEST_MSG를 TEST-GROUP에 shout
//! 2. 아직 아무도 없으므로 재전송
//! 3. node2, node3 시작 후 ACK 수신, 전달 완료
//!
//! 사용법:
//!   cargo run --release --bin ackcast-demo -- [OPTIONS]

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ackcast::{Config, Envelope, MemoryHub, Node, NodeEvent, NodeEvents};

const GROUP: &str = "TEST-GROUP";
const MESSAGE_TYPE: &str = "TEST_MSG";

/// 데모 설정
struct DemoConfig {
    retries: u32,
    wait_secs: u64,
    verbose: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            retries: ackcast::DEFAULT_MAX_RETRIES,
            wait_secs: 6,
            verbose: false,
        }
    }
}

fn parse_args() -> DemoConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DemoConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--retries" | "-r" => {
                if i + 1 < args.len() {
                    config.retries = args[i + 1].parse().unwrap_or(config.retries);
                    i += 1;
                }
            }
            "--wait" | "-w" => {
                if i + 1 < args.len() {
                    config.wait_secs = args[i + 1].parse().unwrap_or(config.wait_secs);
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"Ackcast Demo - ACK 기반 전달 보장 데모

메모리 허브 위의 노드 3개로 재전송/ACK 흐름 재현

사용법:
  cargo run --release --bin ackcast-demo -- [OPTIONS]

옵션:
  -r, --retries <N>      최대 재시도 횟수 (기본: 5)
  -w, --wait <SECS>      node2/node3 시작 전 대기 시간 (기본: 6)
  -v, --verbose          수신 이벤트 전체 로깅
  -h, --help             이 도움말 출력

로그 레벨은 RUST_LOG 로 조정 (예: RUST_LOG=ackcast=debug)
"#
                );
                std::process::exit(0);
            }
            other => {
                warn!("알 수 없는 옵션 무시: {}", other);
            }
        }
        i += 1;
    }

    config
}

fn node_config(name: &str, demo: &DemoConfig) -> Config {
    let mut config = Config::new(name);
    config.groups = vec![GROUP.to_string()];
    config.message_types = vec![MESSAGE_TYPE.to_string()];
    config.acknowledge = true;
    config.max_retries = demo.retries;
    config.verbose = demo.verbose;
    config
}

/// 노드 이벤트 로깅 태스크
fn log_events(name: &'static str, mut events: NodeEvents) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                NodeEvent::Message(message) => {
                    let msg_type = message
                        .envelope
                        .as_ref()
                        .map(|e| e.msg_type().to_string())
                        .unwrap_or_else(|| "text".to_string());
                    info!("[{}] 메시지 수신: {} from {}", name, msg_type, message.peer_name);
                }
                NodeEvent::DeliveryStatus { msg_id, status } => {
                    info!("[{}] 전달 상태: msgId={} → {:?}", name, msg_id, status);
                }
                NodeEvent::PeerEntered { peer_name, .. } => {
                    info!("[{}] 피어 입장: {}", name, peer_name);
                }
                NodeEvent::PeerJoined { peer_name, group, .. } => {
                    info!("[{}] 피어 그룹 가입: {} → {}", name, peer_name, group);
                }
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정 (RUST_LOG 우선)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let demo = parse_args();
    let hub = MemoryHub::new();

    info!("Ackcast demo starting (max retries: {})", demo.retries);

    let node1_config = node_config("node1", &demo);
    let transport = Arc::new(hub.transport(&node1_config));
    let (node1, events1) = Node::start(node1_config, transport).await?;
    let log1 = log_events("node1", events1);

    let message = Envelope::new(MESSAGE_TYPE)
        .with_receivers(["node2", "node3"])
        .with_field("text", "hello from node1");
    let msg_id = message.msg_id().to_string();

    info!("node1 → {}: msgId={} (수신자 아직 없음)", GROUP, msg_id);
    node1.shout(message, None).await?;

    tokio::time::sleep(Duration::from_secs(demo.wait_secs)).await;

    let mut others = Vec::new();
    let mut loggers = Vec::new();
    for name in ["node2", "node3"] {
        let config = node_config(name, &demo);
        let transport = Arc::new(hub.transport(&config));
        let (node, events) = Node::start(config, transport).await?;
        loggers.push(log_events(name, events));
        others.push(node);
    }

    // node1의 다음 재전송까지 대기
    for _ in 0..30 {
        if node1.pending(&msg_id).is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    match node1.pending(&msg_id) {
        None => info!("전달 종료: msgId={}", msg_id),
        Some(pending) => warn!(
            "아직 ACK 대기 중: msgId={}, retry={}, 남은 수신자={:?}",
            msg_id, pending.retry_count, pending.remaining_recipients
        ),
    }

    info!("node1 stats: {}", node1.stats().summary());
    for node in &others {
        info!("{} stats: {}", node.node_name(), node.stats().summary());
    }

    for node in &others {
        node.stop().await?;
    }
    node1.stop().await?;

    // 수신 루프가 끝나면 이벤트 채널이 닫힘
    let _ = log1.await;
    for logger in loggers {
        let _ = logger.await;
    }

    info!("Ackcast demo finished");
    Ok(())
}

//! 전달 통계

use std::time::{Duration, Instant};

/// 노드 전달 통계
#[derive(Debug, Clone)]
pub struct DeliveryStats {
    /// 시작 시간
    pub start_time: Instant,

    /// shout 송신 수 (그룹별)
    pub shouts: u64,

    /// whisper 송신 수 (피어별)
    pub whispers: u64,

    /// 전송 계층 송신 실패 수
    pub send_failures: u64,

    /// 이름으로 찾지 못한 피어 수
    pub unresolved_peers: u64,

    /// ACK 추적 시작한 메시지 수
    pub tracked: u64,

    /// 재전송 수
    pub retries: u64,

    /// 모든 수신자가 ACK한 메시지 수
    pub delivered: u64,

    /// 재시도 초과/기한 초과로 폐기된 메시지 수
    pub dropped: u64,

    /// 보낸 ACK 수
    pub acks_sent: u64,

    /// 받은 ACK 수
    pub acks_received: u64,

    /// 애플리케이션에 전달한 메시지 수
    pub messages_received: u64,

    /// 디코딩 실패 수
    pub decode_failures: u64,

    /// 알 수 없는 이벤트 수
    pub unknown_events: u64,

    /// 마지막 ACK 수신 시간
    pub last_ack_time: Option<Instant>,
}

impl DeliveryStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            shouts: 0,
            whispers: 0,
            send_failures: 0,
            unresolved_peers: 0,
            tracked: 0,
            retries: 0,
            delivered: 0,
            dropped: 0,
            acks_sent: 0,
            acks_received: 0,
            messages_received: 0,
            decode_failures: 0,
            unknown_events: 0,
            last_ack_time: None,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 추적이 끝난 메시지 중 전달 완료 비율
    pub fn delivery_ratio(&self) -> f64 {
        let settled = self.delivered + self.dropped;
        if settled == 0 {
            return 1.0;
        }
        self.delivered as f64 / settled as f64
    }

    /// ACK 수신 기록
    pub fn record_ack(&mut self) {
        self.acks_received += 1;
        self.last_ack_time = Some(Instant::now());
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Sent: {} shout / {} whisper | Tracked: {} | Retries: {} | Delivered: {} | Dropped: {} ({:.1}%) | ACKs: {} sent / {} recv | Received: {} | Failures: {}",
            self.elapsed().as_secs_f64(),
            self.shouts,
            self.whispers,
            self.tracked,
            self.retries,
            self.delivered,
            self.dropped,
            (1.0 - self.delivery_ratio()) * 100.0,
            self.acks_sent,
            self.acks_received,
            self.messages_received,
            self.send_failures,
        )
    }
}

impl Default for DeliveryStats {
    fn default() -> Self {
        Self::new()
    }
}

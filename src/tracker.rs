//! ACK 추적기
//!
//! - ACK가 필요한 송신 메시지별 재시도 일정
//! - 수신자별 미확인 목록
//! - 재시도 한도/응답 기한 초과 시 폐기

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::dispatch::RecipientSelector;
use crate::message::Envelope;

/// 재전송 시 사용할 송신 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    /// 그룹 shout
    Group,
    /// 피어 whisper
    Direct,
}

/// 재전송 대상
#[derive(Debug, Clone, PartialEq)]
pub enum ResendTarget {
    /// None이면 가입한 모든 그룹
    Groups(Option<Vec<String>>),
    Peers(RecipientSelector),
}

/// 원본 송신 재현용 인자
#[derive(Debug, Clone, PartialEq)]
pub struct ResendArgs {
    pub envelope: Envelope,
    pub target: ResendTarget,
}

impl ResendArgs {
    pub fn kind(&self) -> DeliveryKind {
        match self.target {
            ResendTarget::Groups(_) => DeliveryKind::Group,
            ResendTarget::Peers(_) => DeliveryKind::Direct,
        }
    }
}

/// 재시도 정책
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 이 횟수를 넘으면 폐기
    pub max_retries: u32,

    /// 등록 시 다음 재시도까지 간격 (고정)
    pub retry_interval: Duration,

    /// 지수 백오프 밑수
    pub backoff_base: u32,

    /// 백오프 단위
    pub backoff_unit: Duration,

    /// 최초 송신 후 추적 최대 기간
    pub reply_horizon: Duration,
}

impl RetryPolicy {
    /// unit * base^retry_count
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = u64::from(self.backoff_base).saturating_pow(retry_count);
        self.backoff_unit
            .saturating_mul(u32::try_from(factor).unwrap_or(u32::MAX))
    }
}

/// ACK 대기 중인 송신 메시지
#[derive(Debug, Clone)]
pub struct PendingDelivery {
    /// 재시도 횟수
    pub retry_count: u32,

    /// 최초 송신 시각
    pub first_attempt_at: Instant,

    /// 마지막 재시도 시각
    pub last_retry_at: Instant,

    /// 다음 재시도 예정 시각
    pub next_retry_at: Instant,

    /// 추적 기한
    pub reply_deadline: Instant,

    /// 마지막으로 계산된 백오프 길이
    pub backoff: Duration,

    pub delivery_kind: DeliveryKind,

    /// 아직 ACK하지 않은 수신자
    /// 비어 있으면 누구의 ACK든 완료 처리
    pub remaining_recipients: BTreeSet<String>,

    pub resend_args: ResendArgs,
}

/// ACK 처리 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// 추적 중이 아님
    Untracked,
    /// 모든 수신자 확인, 항목 삭제
    Completed,
    /// 일부 수신자 남음
    Partial { remaining: usize },
    /// 수신 대상이 아닌 피어의 ACK
    NotARecipient,
}

/// 폐기 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// 재시도 한도 초과
    RetriesExhausted,
    /// 응답 기한 초과
    DeadlineExpired,
}

/// 폐기된 메시지
#[derive(Debug, Clone)]
pub struct DroppedDelivery {
    pub msg_id: String,
    pub reason: DropReason,
    /// 폐기 시점에 ACK하지 않았던 수신자
    pub unacknowledged: BTreeSet<String>,
}

/// sweep 결과
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// 재전송해야 할 메시지
    pub retries: Vec<(String, ResendArgs)>,
    pub dropped: Vec<DroppedDelivery>,
}

/// ACK 추적기
///
/// 수신 루프와 송신 경로가 공유하므로 `Mutex`로 감싸서 사용
#[derive(Debug)]
pub struct AckTracker {
    policy: RetryPolicy,
    pending: HashMap<String, PendingDelivery>,
}

impl AckTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            pending: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 재시도 대상으로 등록
    ///
    /// 이미 있으면 재등록으로 보고 retry_count 증가
    /// 새 항목이면 true
    pub fn register_for_retry(
        &mut self,
        msg_id: &str,
        kind: DeliveryKind,
        recipients: &[String],
        resend_args: ResendArgs,
        now: Instant,
    ) -> bool {
        let next_retry_at = now + self.policy.retry_interval;

        if let Some(entry) = self.pending.get_mut(msg_id) {
            entry.retry_count += 1;
            entry.last_retry_at = entry.next_retry_at;
            entry.next_retry_at = next_retry_at;
            debug!("재등록: msgId={}, retry={}", msg_id, entry.retry_count);
            return false;
        }

        self.pending.insert(
            msg_id.to_string(),
            PendingDelivery {
                retry_count: 0,
                first_attempt_at: now,
                last_retry_at: now,
                next_retry_at,
                reply_deadline: now + self.policy.reply_horizon,
                backoff: Duration::ZERO,
                delivery_kind: kind,
                remaining_recipients: recipients.iter().cloned().collect(),
                resend_args,
            },
        );
        debug!(
            "ACK 추적 시작: msgId={}, kind={:?}, recipients={:?}",
            msg_id, kind, recipients
        );
        true
    }

    /// 다음 재시도 예약 (지수 백오프)
    ///
    /// 재전송 직후 호출. 재등록으로 올라간 retry_count 기준
    pub fn advance_retry(&mut self, msg_id: &str, now: Instant) -> Option<Duration> {
        let entry = self.pending.get_mut(msg_id)?;
        let timeout = self.policy.backoff(entry.retry_count);
        entry.backoff = timeout;
        entry.last_retry_at = entry.next_retry_at;
        entry.next_retry_at = now + timeout;
        entry.retry_count += 1;
        debug!(
            "재전송 예약: msgId={}, retry={}, next in {:?}",
            msg_id, entry.retry_count, timeout
        );
        Some(timeout)
    }

    /// ACK 수신 처리
    pub fn acknowledge(&mut self, msg_id: &str, acknowledger: &str) -> AckOutcome {
        let Some(entry) = self.pending.get_mut(msg_id) else {
            return AckOutcome::Untracked;
        };

        if entry.remaining_recipients.is_empty() {
            self.pending.remove(msg_id);
            return AckOutcome::Completed;
        }

        if !entry.remaining_recipients.remove(acknowledger) {
            return AckOutcome::NotARecipient;
        }

        let remaining = entry.remaining_recipients.len();
        if remaining == 0 {
            debug!("모든 수신자 ACK 완료: msgId={}", msg_id);
            self.pending.remove(msg_id);
            AckOutcome::Completed
        } else {
            AckOutcome::Partial { remaining }
        }
    }

    /// 재전송/폐기 대상 선별
    ///
    /// 재전송 대상의 일정은 건드리지 않음
    /// 호출자가 락 밖에서 재송신하며 `register_for_retry` 후 `advance_retry`
    pub fn sweep(&mut self, now: Instant) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        for (msg_id, entry) in &self.pending {
            if entry.retry_count > self.policy.max_retries {
                warn!(
                    "재시도 {}회 초과, 메시지 폐기: msgId={}",
                    self.policy.max_retries, msg_id
                );
                outcome.dropped.push(DroppedDelivery {
                    msg_id: msg_id.clone(),
                    reason: DropReason::RetriesExhausted,
                    unacknowledged: entry.remaining_recipients.clone(),
                });
            } else if now > entry.reply_deadline {
                warn!("응답 기한 초과, 메시지 폐기: msgId={}", msg_id);
                outcome.dropped.push(DroppedDelivery {
                    msg_id: msg_id.clone(),
                    reason: DropReason::DeadlineExpired,
                    unacknowledged: entry.remaining_recipients.clone(),
                });
            } else if entry.next_retry_at < now {
                outcome
                    .retries
                    .push((msg_id.clone(), entry.resend_args.clone()));
            }
        }

        for dropped in &outcome.dropped {
            self.pending.remove(&dropped.msg_id);
        }

        outcome
    }

    pub fn get(&self, msg_id: &str) -> Option<&PendingDelivery> {
        self.pending.get(msg_id)
    }

    pub fn contains(&self, msg_id: &str) -> bool {
        self.pending.contains_key(msg_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 전체 추적 중단 (종료 시)
    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }
}

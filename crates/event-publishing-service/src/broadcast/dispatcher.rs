//! 广播分发器
//!
//! 一次分发分三步，每一步都经由事件记录上的 CAS 完成：
//!
//! 1. 认领：把待发送渠道写成 `in_flight` 并带上本次的 claim_id；
//!    已成功或仍在租约内的渠道跳过
//! 2. 发送：并发调用各渠道适配器，每次尝试的结果立即写回，失败按指数退避重试
//! 3. 汇总：本轮所有渠道都有结果后，迁移到 broadcasted 或 failed
//!
//! 发送期间不持有任何锁，同一 `(event_id, channel)` 只会被一个分发者发送。

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use broadcast_shared::config::BroadcastConfig;
use broadcast_shared::observability::metrics;
use broadcast_shared::retry::RetryPolicy;
use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::channels::{ChannelAdapter, ChannelError, ChannelReceipt};
use super::registry::ChannelRegistry;
use crate::bus::DomainEventKind;
use crate::error::{EventError, Result};
use crate::models::{
    AuditAction, AuditEntry, ChannelName, DeliveryAttempt, DeliveryState, Event, EventStatus,
};
use crate::service::{EventService, transitioned};

/// 单次 CAS 写入在版本冲突时的最大重读次数
///
/// 同一事件的多个渠道并发写回结果，冲突次数与渠道数同阶
const COMMIT_RETRY_LIMIT: usize = 32;

/// 分发结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub event_id: Uuid,
    pub round: u32,
    /// 本次发送成功的渠道
    pub delivered: Vec<ChannelName>,
    /// 本次发送最终失败的渠道
    pub failed: Vec<ChannelName>,
    /// 已成功、已在本轮失败或被其他分发者持有而跳过的渠道
    pub skipped: Vec<ChannelName>,
    pub final_status: EventStatus,
}

/// 认领结果
struct Claim {
    claim_id: Uuid,
    round: u32,
    /// 认领写入后的事件快照，作为发送内容
    snapshot: Event,
    claimed: Vec<ChannelName>,
    skipped: Vec<ChannelName>,
}

enum ChannelOutcome {
    Delivered,
    Failed,
    /// 认领已被其他分发者接管
    Lost,
}

/// 广播分发器
#[derive(Clone)]
pub struct BroadcastDispatcher {
    events: EventService,
    registry: Arc<ChannelRegistry>,
    retry: RetryPolicy,
    claim_ttl: chrono::Duration,
}

impl BroadcastDispatcher {
    pub fn new(
        events: EventService,
        registry: Arc<ChannelRegistry>,
        retry: RetryPolicy,
        claim_ttl: Duration,
    ) -> Self {
        Self {
            events,
            registry,
            retry,
            claim_ttl: chrono::Duration::from_std(claim_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(300)),
        }
    }

    pub fn from_config(
        events: EventService,
        registry: Arc<ChannelRegistry>,
        config: &BroadcastConfig,
    ) -> Self {
        Self::new(
            events,
            registry,
            RetryPolicy::with_attempts(
                config.max_attempts,
                Duration::from_millis(config.initial_backoff_ms),
                Duration::from_millis(config.max_backoff_ms),
            ),
            Duration::from_secs(config.claim_ttl_secs),
        )
    }

    pub fn events(&self) -> &EventService {
        &self.events
    }

    /// 向指定渠道分发事件
    ///
    /// `requested` 为空时使用事件自身的渠道列表。事件不在 broadcasting 状态时
    /// 返回 `InvalidState`；渠道层面的失败只体现在投递记录中。
    #[instrument(skip(self, requested), fields(event_id = %id))]
    pub async fn dispatch(
        &self,
        id: Uuid,
        requested: &BTreeSet<ChannelName>,
    ) -> Result<DispatchReport> {
        let claim = self.claim(id, requested).await?;

        let mut report = DispatchReport {
            event_id: id,
            round: claim.round,
            delivered: Vec::new(),
            failed: Vec::new(),
            skipped: claim.skipped.clone(),
            final_status: EventStatus::Broadcasting,
        };

        if !claim.claimed.is_empty() {
            info!(
                event_id = %id,
                round = claim.round,
                channels = ?claim.claimed,
                "开始分发"
            );

            let outcomes = join_all(
                claim
                    .claimed
                    .iter()
                    .map(|channel| self.deliver(&claim, channel)),
            )
            .await;

            for (channel, outcome) in claim.claimed.iter().zip(outcomes) {
                match outcome {
                    Ok(ChannelOutcome::Delivered) => report.delivered.push(channel.clone()),
                    Ok(ChannelOutcome::Failed) => report.failed.push(channel.clone()),
                    Ok(ChannelOutcome::Lost) => report.skipped.push(channel.clone()),
                    Err(e) => {
                        // 投递记录写入失败，渠道保持 in_flight，租约过期后由兜底扫描重新认领
                        error!(event_id = %id, channel = %channel, error = %e, "投递结果写入失败");
                        report.skipped.push(channel.clone());
                    }
                }
            }
            self.events.touch_feed().await;
        } else {
            debug!(event_id = %id, skipped = ?claim.skipped, "没有可认领的渠道");
        }

        let finished = self.finalize(id).await?;
        report.final_status = finished.status;
        Ok(report)
    }

    /// 认领待发送渠道
    async fn claim(&self, id: Uuid, requested: &BTreeSet<ChannelName>) -> Result<Claim> {
        let claim_id = Uuid::new_v4();

        for _ in 0..COMMIT_RETRY_LIMIT {
            let current = self.events.get(id).await?;
            if current.status != EventStatus::Broadcasting {
                return Err(EventError::InvalidState {
                    id,
                    status: current.status,
                    operation: "dispatch",
                });
            }

            let requested = if requested.is_empty() {
                current.channels.clone()
            } else {
                requested.clone()
            };
            let round = current.broadcast_round;
            let now = Utc::now();

            let mut next = current.clone();
            next.channels.extend(requested.iter().cloned());
            let mut claimed = Vec::new();
            let mut skipped = Vec::new();

            for channel in &requested {
                let claimable = match current.broadcast_record.get(channel) {
                    None => true,
                    Some(delivery) => match delivery.state {
                        DeliveryState::Succeeded => false,
                        DeliveryState::Failed => delivery.round < round,
                        DeliveryState::InFlight => !delivery.is_claim_live(now, self.claim_ttl),
                    },
                };
                if !claimable {
                    skipped.push(channel.clone());
                    continue;
                }

                let delivery = next.broadcast_record.entry(channel.clone()).or_default();
                delivery.state = DeliveryState::InFlight;
                delivery.success = false;
                delivery.claimed_at = Some(now);
                delivery.claim_id = Some(claim_id);
                delivery.round = round;
                claimed.push(channel.clone());
            }

            if next == current {
                return Ok(Claim {
                    claim_id,
                    round,
                    snapshot: current,
                    claimed,
                    skipped,
                });
            }

            match self
                .events
                .commit(
                    &current,
                    next,
                    DomainEventKind::DeliveryUpdated {
                        channels: claimed.clone(),
                    },
                )
                .await
            {
                Ok(saved) => {
                    return Ok(Claim {
                        claim_id,
                        round,
                        snapshot: saved,
                        claimed,
                        skipped,
                    });
                }
                Err(EventError::Conflict { .. }) => {
                    debug!(event_id = %id, "认领时版本冲突，重新读取");
                }
                Err(e) => return Err(e),
            }
        }

        Err(EventError::Internal(format!("认领渠道失败: event_id={}", id)))
    }

    /// 向单个渠道发送，直到成功、遇到不可重试错误或用尽尝试次数
    async fn deliver(&self, claim: &Claim, channel: &ChannelName) -> Result<ChannelOutcome> {
        let event = &claim.snapshot;

        let Some(adapter) = self.registry.get(channel) else {
            let err = ChannelError::Unsupported(channel.clone());
            warn!(event_id = %event.id, channel = %channel, "未注册的渠道");
            metrics::record_channel_delivery(channel.as_str(), err.outcome(), 0.0);
            let owned = self
                .record_attempt(claim, channel, &Err(err.clone()), Duration::ZERO, true)
                .await?;
            if !owned {
                return Ok(ChannelOutcome::Lost);
            }
            self.audit_channel(event.id, channel, Some(&err)).await;
            return Ok(ChannelOutcome::Failed);
        };

        let mut failures = 0u32;
        loop {
            let (result, elapsed) = send_with_timeout(adapter.as_ref(), event).await;
            let terminal = match &result {
                Ok(_) => true,
                Err(e) => !e.is_retryable() || !self.retry.should_retry(failures),
            };

            let outcome = match &result {
                Ok(_) => "success",
                Err(e) => e.outcome(),
            };
            metrics::record_channel_delivery(channel.as_str(), outcome, elapsed.as_secs_f64());

            let owned = self
                .record_attempt(claim, channel, &result, elapsed, terminal)
                .await?;
            if !owned {
                warn!(event_id = %event.id, channel = %channel, "渠道认领已失效，停止发送");
                return Ok(ChannelOutcome::Lost);
            }

            match result {
                Ok(_) => {
                    info!(event_id = %event.id, channel = %channel, attempt = failures + 1, "渠道投递成功");
                    self.audit_channel(event.id, channel, None).await;
                    return Ok(ChannelOutcome::Delivered);
                }
                Err(e) if terminal => {
                    warn!(
                        event_id = %event.id,
                        channel = %channel,
                        attempt = failures + 1,
                        error = %e,
                        "渠道投递失败"
                    );
                    self.audit_channel(event.id, channel, Some(&e)).await;
                    return Ok(ChannelOutcome::Failed);
                }
                Err(e) => {
                    let delay = self.retry.delay_for_attempt(failures);
                    debug!(
                        event_id = %event.id,
                        channel = %channel,
                        attempt = failures + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "渠道投递失败，等待重试"
                    );
                    tokio::time::sleep(delay).await;
                    failures += 1;
                }
            }
        }
    }

    /// 写回一次尝试的结果
    ///
    /// 只有仍持有认领的分发者才能写入，返回 false 表示认领已失效
    async fn record_attempt(
        &self,
        claim: &Claim,
        channel: &ChannelName,
        result: &std::result::Result<ChannelReceipt, ChannelError>,
        elapsed: Duration,
        terminal: bool,
    ) -> Result<bool> {
        let id = claim.snapshot.id;

        for _ in 0..COMMIT_RETRY_LIMIT {
            let current = self.events.get(id).await?;
            let owned = current.broadcast_record.get(channel).is_some_and(|d| {
                d.state == DeliveryState::InFlight && d.claim_id == Some(claim.claim_id)
            });
            if !owned {
                return Ok(false);
            }

            let now = Utc::now();
            let mut next = current.clone();
            if let Some(delivery) = next.broadcast_record.get_mut(channel) {
                delivery.attempt_count += 1;
                delivery.attempted_at = Some(now);
                delivery.history.push(DeliveryAttempt {
                    attempt: delivery.attempt_count,
                    round: claim.round,
                    attempted_at: now,
                    success: result.is_ok(),
                    error: result.as_ref().err().map(ToString::to_string),
                    duration_ms: elapsed.as_millis() as u64,
                });

                match result {
                    Ok(receipt) => {
                        delivery.state = DeliveryState::Succeeded;
                        delivery.success = true;
                        delivery.error = None;
                        delivery.external_id = receipt.message_id.clone();
                    }
                    Err(e) => {
                        delivery.success = false;
                        delivery.error = Some(e.to_string());
                        if terminal {
                            delivery.state = DeliveryState::Failed;
                        } else {
                            // 续租，避免重试等待期间被他人接管
                            delivery.claimed_at = Some(now);
                        }
                    }
                }
            }

            match self
                .events
                .commit(
                    &current,
                    next,
                    DomainEventKind::DeliveryUpdated {
                        channels: vec![channel.clone()],
                    },
                )
                .await
            {
                Ok(_) => return Ok(true),
                Err(EventError::Conflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(EventError::Internal(format!(
            "投递结果写入冲突次数过多: event_id={}, channel={}",
            id, channel
        )))
    }

    /// 本轮全部有结果时汇总为 broadcasted 或 failed
    async fn finalize(&self, id: Uuid) -> Result<Event> {
        for _ in 0..COMMIT_RETRY_LIMIT {
            let current = self.events.get(id).await?;
            if current.status != EventStatus::Broadcasting || !current.is_round_settled() {
                return Ok(current);
            }

            let target = if current.all_requested_succeeded() {
                EventStatus::Broadcasted
            } else {
                EventStatus::Failed
            };
            let next = transitioned(&current, target)?;

            match self
                .events
                .commit(
                    &current,
                    next,
                    DomainEventKind::StatusChanged {
                        from: EventStatus::Broadcasting,
                        to: target,
                    },
                )
                .await
            {
                Ok(saved) => {
                    let failed: Vec<_> = saved
                        .channels
                        .iter()
                        .filter(|c| {
                            saved
                                .broadcast_record
                                .get(*c)
                                .is_some_and(|d| d.state == DeliveryState::Failed)
                        })
                        .cloned()
                        .collect();
                    self.events
                        .record_audit(AuditEntry::new(
                            id,
                            AuditAction::BroadcastCompleted,
                            None,
                            json!({
                                "status": target,
                                "round": saved.broadcast_round,
                                "failed_channels": failed,
                            }),
                        ))
                        .await;
                    self.events.touch_feed().await;
                    metrics::record_broadcast_completion(target.as_str());

                    info!(event_id = %id, status = %target, round = saved.broadcast_round, "广播完成");
                    return Ok(saved);
                }
                Err(EventError::Conflict { .. }) => {
                    debug!(event_id = %id, "汇总时版本冲突，重新读取");
                }
                Err(e) => return Err(e),
            }
        }

        Err(EventError::Internal(format!("广播汇总失败: event_id={}", id)))
    }

    async fn audit_channel(&self, id: Uuid, channel: &ChannelName, error: Option<&ChannelError>) {
        let (action, details) = match error {
            None => (
                AuditAction::ChannelDelivered,
                json!({ "channel": channel, "status": "sent" }),
            ),
            Some(e) => (
                AuditAction::ChannelFailed,
                json!({ "channel": channel, "status": "failed", "error": e.to_string() }),
            ),
        };
        self.events
            .record_audit(AuditEntry::new(id, action, None, details))
            .await;
    }
}

/// 在适配器超时内发送一次，超时记为瞬时失败
async fn send_with_timeout(
    adapter: &dyn ChannelAdapter,
    event: &Event,
) -> (std::result::Result<ChannelReceipt, ChannelError>, Duration) {
    let timeout = adapter.timeout();
    let started = Instant::now();
    let result = match tokio::time::timeout(timeout, adapter.send(event)).await {
        Ok(result) => result,
        Err(_) => Err(ChannelError::Timeout(timeout)),
    };
    (result, started.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::DomainEventBus;
    use crate::broadcast::channels::SmsChannel;
    use crate::models::{ChannelDelivery, normalize_channels};
    use crate::store::MemoryEventStore;

    fn setup() -> (EventService, BroadcastDispatcher) {
        let events = EventService::new(
            Arc::new(MemoryEventStore::new()),
            Arc::new(DomainEventBus::default()),
            normalize_channels(["sms"]),
        );
        let mut registry = ChannelRegistry::new();
        registry.register(Arc::new(SmsChannel::with_defaults()));
        let dispatcher = BroadcastDispatcher::new(
            events.clone(),
            Arc::new(registry),
            RetryPolicy::with_attempts(3, Duration::from_millis(1), Duration::from_millis(5)),
            Duration::from_secs(60),
        );
        (events, dispatcher)
    }

    /// 直接写入 broadcasting 状态的事件
    async fn broadcasting(events: &EventService, record: Option<ChannelDelivery>) -> Event {
        let mut event = Event::new_draft(
            "dispatch".to_string(),
            Uuid::new_v4(),
            normalize_channels(["sms"]),
            Utc::now(),
        );
        event.status = EventStatus::Broadcasting;
        event.broadcast_round = 1;
        if let Some(record) = record {
            event.broadcast_record.insert(ChannelName::new("sms"), record);
        }
        events.store().insert(&event).await.unwrap();
        event
    }

    #[tokio::test]
    async fn test_live_claim_is_skipped() {
        let (events, dispatcher) = setup();
        let event = broadcasting(
            &events,
            Some(ChannelDelivery {
                state: DeliveryState::InFlight,
                claimed_at: Some(Utc::now()),
                claim_id: Some(Uuid::new_v4()),
                round: 1,
                ..Default::default()
            }),
        )
        .await;

        let report = dispatcher.dispatch(event.id, &BTreeSet::new()).await.unwrap();
        assert!(report.delivered.is_empty());
        assert_eq!(report.skipped, vec![ChannelName::new("sms")]);
        assert_eq!(report.final_status, EventStatus::Broadcasting);
    }

    #[tokio::test]
    async fn test_expired_claim_is_taken_over() {
        let (events, dispatcher) = setup();
        let event = broadcasting(
            &events,
            Some(ChannelDelivery {
                state: DeliveryState::InFlight,
                claimed_at: Some(Utc::now() - chrono::Duration::minutes(10)),
                claim_id: Some(Uuid::new_v4()),
                round: 1,
                ..Default::default()
            }),
        )
        .await;

        let report = dispatcher.dispatch(event.id, &BTreeSet::new()).await.unwrap();
        assert_eq!(report.delivered, vec![ChannelName::new("sms")]);
        assert_eq!(report.final_status, EventStatus::Broadcasted);
    }

    #[tokio::test]
    async fn test_settled_round_is_rolled_up_without_sending() {
        let (events, dispatcher) = setup();
        let event = broadcasting(
            &events,
            Some(ChannelDelivery {
                state: DeliveryState::Succeeded,
                success: true,
                attempt_count: 1,
                round: 1,
                ..Default::default()
            }),
        )
        .await;

        let report = dispatcher.dispatch(event.id, &BTreeSet::new()).await.unwrap();
        assert!(report.delivered.is_empty());
        assert_eq!(report.final_status, EventStatus::Broadcasted);

        let saved = events.get(event.id).await.unwrap();
        assert_eq!(saved.broadcast_record[&ChannelName::new("sms")].attempt_count, 1);
    }

    #[tokio::test]
    async fn test_explicit_channels_extend_the_round() {
        let (events, dispatcher) = setup();
        let event = broadcasting(&events, None).await;

        let report = dispatcher
            .dispatch(event.id, &normalize_channels(["sms", "pager"]))
            .await
            .unwrap();
        assert_eq!(report.delivered, vec![ChannelName::new("sms")]);
        assert_eq!(report.failed, vec![ChannelName::new("pager")]);
        assert_eq!(report.final_status, EventStatus::Failed);

        let saved = events.get(event.id).await.unwrap();
        assert!(saved.channels.contains(&ChannelName::new("pager")));
        let pager = &saved.broadcast_record[&ChannelName::new("pager")];
        assert_eq!(pager.attempt_count, 1);
        assert_eq!(pager.error.as_deref(), Some("不支持的渠道: pager"));
    }

    #[tokio::test]
    async fn test_dispatch_requires_broadcasting() {
        let (events, dispatcher) = setup();
        let event = events
            .create(crate::models::EventDraft {
                title: Some("draft".to_string()),
                created_by: Some(Uuid::new_v4()),
                ..Default::default()
            })
            .await
            .unwrap();

        let err = dispatcher
            .dispatch(event.id, &BTreeSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::InvalidState { operation: "dispatch", .. }));
        assert_eq!(err.error_code(), "INVALID_STATE");
    }
}

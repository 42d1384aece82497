//! 审核闸门
//!
//! 校验并应用审核决定。通过时先写入审核记录（pending_review -> approved），
//! 再按排期进入 scheduled 或 broadcasting；驳回时进入 rejected。

use std::sync::Arc;

use broadcast_shared::observability::metrics;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::authorizer::ModeratorAuthorizer;
use crate::bus::DomainEventKind;
use crate::error::{EventError, Result};
use crate::models::{
    AuditAction, AuditEntry, Event, EventStatus, ModerationDecision, ModerationRecord,
};
use crate::service::{EventService, ensure_version, transitioned};

/// approved 之后的推进在 CAS 冲突时的最大重读次数
const MAX_ADVANCE_ATTEMPTS: usize = 3;

/// 审核请求
#[derive(Debug, Clone)]
pub struct ModerationRequest {
    pub moderator_id: Uuid,
    pub decision: ModerationDecision,
    pub notes: Option<String>,
    pub expected_version: Option<i64>,
}

/// 审核闸门
#[derive(Clone)]
pub struct ModerationGate {
    events: EventService,
    authorizer: Arc<dyn ModeratorAuthorizer>,
}

impl ModerationGate {
    pub fn new(events: EventService, authorizer: Arc<dyn ModeratorAuthorizer>) -> Self {
        Self { events, authorizer }
    }

    /// 应用审核决定
    ///
    /// 检查顺序：事件存在 -> 本轮未审核 -> 版本 -> 状态为 pending_review -> 审核权限
    #[instrument(skip(self, request), fields(moderator_id = %request.moderator_id, decision = %request.decision))]
    pub async fn moderate(&self, id: Uuid, request: ModerationRequest) -> Result<Event> {
        let current = self.events.get(id).await?;

        if current.moderation.is_some() {
            return Err(EventError::AlreadyModerated(id));
        }
        ensure_version(&current, request.expected_version)?;
        if current.status != EventStatus::PendingReview {
            return Err(EventError::InvalidState {
                id,
                status: current.status,
                operation: "moderate",
            });
        }
        if !self.authorizer.can_moderate(request.moderator_id).await {
            warn!(event_id = %id, moderator_id = %request.moderator_id, "无审核权限");
            return Err(EventError::Forbidden(request.moderator_id));
        }

        let decided = match request.decision {
            ModerationDecision::Approve => EventStatus::Approved,
            ModerationDecision::Reject => EventStatus::Rejected,
        };
        let mut next = transitioned(&current, decided)?;
        next.moderation = Some(ModerationRecord {
            moderator_id: request.moderator_id,
            decision: request.decision,
            notes: request.notes.clone(),
            decided_at: Utc::now(),
        });

        let saved = match self
            .events
            .commit(
                &current,
                next,
                DomainEventKind::Moderated {
                    decision: request.decision,
                },
            )
            .await
        {
            Ok(saved) => saved,
            Err(EventError::Conflict { .. }) => return Err(self.explain_conflict(&current).await),
            Err(e) => return Err(e),
        };

        let finished = match request.decision {
            ModerationDecision::Approve => self.advance_approved(saved).await?,
            ModerationDecision::Reject => saved,
        };

        self.events
            .record_audit(AuditEntry::new(
                id,
                AuditAction::Moderated,
                Some(request.moderator_id),
                json!({
                    "decision": request.decision,
                    "notes": request.notes,
                    "status": finished.status,
                }),
            ))
            .await;
        self.events.touch_feed().await;
        metrics::record_moderation(request.decision.as_str());

        info!(event_id = %id, status = %finished.status, "审核完成");
        Ok(finished)
    }

    /// 审核写入冲突后重新读取事件
    ///
    /// 已有审核结论说明另一位审核员先完成了本轮审核；其余情况（如作者并发编辑）仍是版本冲突
    async fn explain_conflict(&self, stale: &Event) -> EventError {
        match self.events.get(stale.id).await {
            Ok(latest) if latest.moderation.is_some() => EventError::AlreadyModerated(stale.id),
            Ok(latest) => EventError::Conflict {
                id: stale.id,
                expected: stale.version,
                actual: latest.version,
            },
            Err(e) => e,
        }
    }

    /// approved -> scheduled（排期在未来）或 broadcasting
    async fn advance_approved(&self, mut current: Event) -> Result<Event> {
        for _ in 0..MAX_ADVANCE_ATTEMPTS {
            if current.status != EventStatus::Approved {
                // 已被其他流程推进
                return Ok(current);
            }

            let target = match current.scheduled_at {
                Some(at) if at > Utc::now() => EventStatus::Scheduled,
                _ => EventStatus::Broadcasting,
            };
            let next = transitioned(&current, target)?;

            match self
                .events
                .commit(
                    &current,
                    next,
                    DomainEventKind::StatusChanged {
                        from: EventStatus::Approved,
                        to: target,
                    },
                )
                .await
            {
                Ok(saved) => return Ok(saved),
                Err(EventError::Conflict { .. }) => {
                    debug!(event_id = %current.id, "推进 approved 时版本冲突，重新读取");
                    current = self.events.get(current.id).await?;
                }
                Err(e) => return Err(e),
            }
        }

        Err(EventError::Internal(format!(
            "审核通过后推进状态失败: event_id={}",
            current.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::DomainEventBus;
    use crate::models::{EventDraft, normalize_channels};
    use crate::moderation::authorizer::{MockModeratorAuthorizer, StaticModeratorAuthorizer};
    use crate::store::{MemoryEventStore, MockEventStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn events() -> EventService {
        EventService::new(
            Arc::new(MemoryEventStore::new()),
            Arc::new(DomainEventBus::default()),
            normalize_channels(["fcm"]),
        )
    }

    async fn pending(events: &EventService, scheduled_in: Option<chrono::Duration>) -> Event {
        let event = events
            .create(EventDraft {
                title: Some("review me".to_string()),
                created_by: Some(Uuid::new_v4()),
                scheduled_at: scheduled_in.map(|d| Utc::now() + d),
                ..Default::default()
            })
            .await
            .unwrap();
        events.submit(event.id, None, None).await.unwrap()
    }

    fn approve(moderator_id: Uuid) -> ModerationRequest {
        ModerationRequest {
            moderator_id,
            decision: ModerationDecision::Approve,
            notes: Some("lgtm".to_string()),
            expected_version: None,
        }
    }

    #[tokio::test]
    async fn test_approve_without_schedule_goes_broadcasting() {
        let events = events();
        let gate = ModerationGate::new(events.clone(), Arc::new(StaticModeratorAuthorizer::allow_all()));
        let event = pending(&events, None).await;

        let result = gate.moderate(event.id, approve(Uuid::new_v4())).await.unwrap();
        assert_eq!(result.status, EventStatus::Broadcasting);
        assert_eq!(result.broadcast_round, 1);
        let record = result.moderation.unwrap();
        assert_eq!(record.decision, ModerationDecision::Approve);
        assert_eq!(record.notes.as_deref(), Some("lgtm"));
    }

    #[tokio::test]
    async fn test_approve_with_future_schedule_goes_scheduled() {
        let events = events();
        let gate = ModerationGate::new(events.clone(), Arc::new(StaticModeratorAuthorizer::allow_all()));
        let event = pending(&events, Some(chrono::Duration::hours(2))).await;

        let result = gate.moderate(event.id, approve(Uuid::new_v4())).await.unwrap();
        assert_eq!(result.status, EventStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_approve_with_past_schedule_goes_broadcasting() {
        let events = events();
        let gate = ModerationGate::new(events.clone(), Arc::new(StaticModeratorAuthorizer::allow_all()));
        let event = pending(&events, Some(chrono::Duration::minutes(-5))).await;

        let result = gate.moderate(event.id, approve(Uuid::new_v4())).await.unwrap();
        assert_eq!(result.status, EventStatus::Broadcasting);
    }

    #[tokio::test]
    async fn test_reject() {
        let events = events();
        let gate = ModerationGate::new(events.clone(), Arc::new(StaticModeratorAuthorizer::allow_all()));
        let event = pending(&events, None).await;

        let result = gate
            .moderate(
                event.id,
                ModerationRequest {
                    moderator_id: Uuid::new_v4(),
                    decision: ModerationDecision::Reject,
                    notes: None,
                    expected_version: Some(event.version),
                },
            )
            .await
            .unwrap();
        assert_eq!(result.status, EventStatus::Rejected);
        assert_eq!(result.version, event.version + 1);
    }

    #[tokio::test]
    async fn test_double_moderation_conflicts() {
        let events = events();
        let gate = ModerationGate::new(events.clone(), Arc::new(StaticModeratorAuthorizer::allow_all()));
        let event = pending(&events, None).await;

        gate.moderate(event.id, approve(Uuid::new_v4())).await.unwrap();
        let err = gate
            .moderate(event.id, approve(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::AlreadyModerated(_)));
        assert_eq!(err.error_code(), "CONFLICT");
    }

    #[tokio::test]
    async fn test_moderating_a_draft_is_invalid_state() {
        let events = events();
        let gate = ModerationGate::new(events.clone(), Arc::new(StaticModeratorAuthorizer::allow_all()));
        let event = events
            .create(EventDraft {
                title: Some("draft".to_string()),
                created_by: Some(Uuid::new_v4()),
                ..Default::default()
            })
            .await
            .unwrap();

        let err = gate
            .moderate(event.id, approve(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_forbidden_moderator() {
        let events = events();
        let mut authorizer = MockModeratorAuthorizer::new();
        authorizer.expect_can_moderate().times(1).returning(|_| false);
        let gate = ModerationGate::new(events.clone(), Arc::new(authorizer));
        let event = pending(&events, None).await;

        let outsider = Uuid::new_v4();
        let err = gate.moderate(event.id, approve(outsider)).await.unwrap_err();
        assert!(matches!(err, EventError::Forbidden(id) if id == outsider));

        let unchanged = events.get(event.id).await.unwrap();
        assert_eq!(unchanged.status, EventStatus::PendingReview);
        assert!(unchanged.moderation.is_none());
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let events = events();
        let gate = ModerationGate::new(events.clone(), Arc::new(StaticModeratorAuthorizer::allow_all()));
        let event = pending(&events, None).await;

        let mut request = approve(Uuid::new_v4());
        request.expected_version = Some(event.version - 1);
        let err = gate.moderate(event.id, request).await.unwrap_err();
        assert!(matches!(err, EventError::Conflict { .. }));
    }

    /// 首次读取返回待审核事件，写入总是冲突，之后的读取返回 `latest`
    fn racing_gate(stale: Event, latest: Event) -> ModerationGate {
        let mut store = MockEventStore::new();
        let reads = AtomicUsize::new(0);
        store.expect_get().returning(move |_| {
            if reads.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Some(stale.clone()))
            } else {
                Ok(Some(latest.clone()))
            }
        });
        store.expect_compare_and_swap().returning(|e, expected| {
            Err(EventError::Conflict {
                id: e.id,
                expected,
                actual: expected + 1,
            })
        });
        let events = EventService::new(
            Arc::new(store),
            Arc::new(DomainEventBus::default()),
            normalize_channels(["fcm"]),
        );
        ModerationGate::new(events, Arc::new(StaticModeratorAuthorizer::allow_all()))
    }

    fn pending_review() -> Event {
        let mut event = Event::new_draft(
            "review me".to_string(),
            Uuid::new_v4(),
            normalize_channels(["fcm"]),
            Utc::now(),
        );
        event.status = EventStatus::PendingReview;
        event.version = 2;
        event
    }

    #[tokio::test]
    async fn test_concurrent_author_edit_is_version_conflict() {
        let stale = pending_review();
        let mut edited = stale.clone();
        edited.summary = "edited by author".to_string();
        edited.version = 3;
        let gate = racing_gate(stale.clone(), edited);

        let err = gate
            .moderate(stale.id, approve(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EventError::Conflict {
                expected: 2,
                actual: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_moderation_is_already_moderated() {
        let stale = pending_review();
        let mut moderated = stale.clone();
        moderated.status = EventStatus::Rejected;
        moderated.version = 3;
        moderated.moderation = Some(ModerationRecord {
            moderator_id: Uuid::new_v4(),
            decision: ModerationDecision::Reject,
            notes: None,
            decided_at: Utc::now(),
        });
        let gate = racing_gate(stale.clone(), moderated);

        let err = gate
            .moderate(stale.id, approve(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::AlreadyModerated(id) if id == stale.id));
    }
}

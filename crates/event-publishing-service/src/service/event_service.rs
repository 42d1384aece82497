//! 事件生命周期服务
//!
//! 事件的创建、编辑、状态迁移、提交审核与重新打开。所有写操作都经由
//! [`EventService::commit`] 完成 CAS 写入并在总线上发布领域事件。

use std::collections::BTreeSet;
use std::sync::Arc;

use broadcast_shared::observability::metrics;
use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::bus::{DomainEvent, DomainEventBus, DomainEventKind};
use crate::error::{EventError, Result};
use crate::models::{
    AuditAction, AuditEntry, ChannelName, Event, EventDraft, EventPage, EventPatch, EventQuery,
    EventStatus, normalize_channels, normalize_tags,
};
use crate::store::EventStore;

const MAX_TITLE_CHARS: usize = 200;
const MAX_CHANNEL_NAME_CHARS: usize = 32;
/// 与 tags.name 列宽一致
const MAX_TAG_CHARS: usize = 64;
/// 标签搜索默认返回条数
pub const TAG_SEARCH_LIMIT: usize = 20;

/// 事件生命周期服务
#[derive(Clone)]
pub struct EventService {
    store: Arc<dyn EventStore>,
    bus: Arc<DomainEventBus>,
    default_channels: BTreeSet<ChannelName>,
}

impl EventService {
    pub fn new(
        store: Arc<dyn EventStore>,
        bus: Arc<DomainEventBus>,
        default_channels: BTreeSet<ChannelName>,
    ) -> Self {
        Self {
            store,
            bus,
            default_channels,
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<DomainEventBus> {
        &self.bus
    }

    pub fn default_channels(&self) -> &BTreeSet<ChannelName> {
        &self.default_channels
    }

    // ==================== 查询 ====================

    pub async fn get(&self, id: Uuid) -> Result<Event> {
        self.store.get(id).await?.ok_or(EventError::NotFound(id))
    }

    pub async fn list(&self, query: &EventQuery) -> Result<EventPage> {
        self.store.list(query).await
    }

    /// 事件的审计轨迹，按时间正序
    pub async fn audit_trail(&self, id: Uuid) -> Result<Vec<AuditEntry>> {
        self.get(id).await?;
        self.store.list_audit(id).await
    }

    pub async fn feed_version(&self) -> Result<i64> {
        self.store.feed_version().await
    }

    pub async fn search_tags(&self, query: &str) -> Result<Vec<String>> {
        self.store.search_tags(query, TAG_SEARCH_LIMIT).await
    }

    // ==================== 写操作 ====================

    /// 创建草稿
    #[instrument(skip(self, draft), fields(created_by = ?draft.created_by))]
    pub async fn create(&self, draft: EventDraft) -> Result<Event> {
        let title = validate_title(draft.title.as_deref())?;
        let created_by = draft
            .created_by
            .filter(|id| !id.is_nil())
            .ok_or_else(|| EventError::Validation("created_by 不能为空".to_string()))?;
        let channels = self.resolve_channels(&draft.channels)?;

        let mut event = Event::new_draft(title, created_by, channels, Utc::now());
        event.summary = draft.summary.unwrap_or_default();
        event.body = draft.body.unwrap_or_default();
        event.attachments = draft.attachments;
        event.tags = validate_tags(&draft.tags)?;
        event.scheduled_at = draft.scheduled_at;

        self.store.insert(&event).await?;
        self.bus
            .publish(DomainEvent::new(event.id, event.version, DomainEventKind::Created));

        self.remember_tags(&event).await;
        self.record_audit(AuditEntry::new(
            event.id,
            AuditAction::Created,
            Some(created_by),
            json!({ "title": event.title, "channels": event.channels }),
        ))
        .await;
        self.touch_feed().await;
        metrics::record_event_mutation("create", "ok");

        info!(event_id = %event.id, "事件草稿已创建");
        Ok(event)
    }

    /// 部分更新，仅限 draft / pending_review
    #[instrument(skip(self, patch), fields(event_id = %id))]
    pub async fn patch(
        &self,
        id: Uuid,
        patch: EventPatch,
        expected_version: Option<i64>,
    ) -> Result<Event> {
        if patch.is_empty() {
            return Err(EventError::Validation("没有需要更新的字段".to_string()));
        }

        let current = self.get(id).await?;
        ensure_version(&current, expected_version)?;
        if !current.status.is_editable() {
            return Err(EventError::InvalidState {
                id,
                status: current.status,
                operation: "patch",
            });
        }

        let fields = patch.changed_fields();
        let mut next = current.clone();
        if let Some(title) = patch.title.as_deref() {
            next.title = validate_title(Some(title))?;
        }
        if let Some(summary) = patch.summary {
            next.summary = summary;
        }
        if let Some(body) = patch.body {
            next.body = body;
        }
        if let Some(attachments) = patch.attachments {
            next.attachments = attachments;
        }
        if let Some(tags) = patch.tags.as_ref() {
            next.tags = validate_tags(tags)?;
        }
        if let Some(channels) = patch.channels.as_ref() {
            next.channels = self.resolve_channels(channels)?;
        }
        if let Some(scheduled_at) = patch.scheduled_at {
            next.scheduled_at = scheduled_at;
        }

        let saved = self
            .commit(&current, next, DomainEventKind::ContentUpdated)
            .await
            .inspect_err(|e| metrics::record_event_mutation("patch", e.error_code()))?;

        self.remember_tags(&saved).await;
        self.record_audit(AuditEntry::new(
            id,
            AuditAction::Updated,
            None,
            json!({ "fields": fields }),
        ))
        .await;
        self.touch_feed().await;
        metrics::record_event_mutation("patch", "ok");

        info!(event_id = %id, version = saved.version, "事件已更新");
        Ok(saved)
    }

    /// 原子状态迁移：校验版本与状态机边后 CAS 写入
    #[instrument(skip(self), fields(event_id = %id))]
    pub async fn transition(
        &self,
        id: Uuid,
        to: EventStatus,
        expected_version: i64,
    ) -> Result<Event> {
        let current = self.get(id).await?;
        ensure_version(&current, Some(expected_version))?;
        let next = transitioned(&current, to)?;

        let saved = self
            .commit(
                &current,
                next,
                DomainEventKind::StatusChanged {
                    from: current.status,
                    to,
                },
            )
            .await?;

        self.record_audit(AuditEntry::new(
            id,
            AuditAction::StatusChanged,
            None,
            json!({ "from": current.status, "to": to }),
        ))
        .await;
        self.touch_feed().await;
        metrics::record_event_mutation("transition", "ok");

        info!(event_id = %id, from = %current.status, to = %to, "事件状态已迁移");
        Ok(saved)
    }

    /// 提交审核：draft -> pending_review
    #[instrument(skip(self), fields(event_id = %id))]
    pub async fn submit(
        &self,
        id: Uuid,
        expected_version: Option<i64>,
        actor: Option<Uuid>,
    ) -> Result<Event> {
        let current = self.get(id).await?;
        ensure_version(&current, expected_version)?;
        if current.status != EventStatus::Draft {
            return Err(EventError::InvalidState {
                id,
                status: current.status,
                operation: "submit",
            });
        }

        let next = transitioned(&current, EventStatus::PendingReview)?;
        let saved = self
            .commit(
                &current,
                next,
                DomainEventKind::StatusChanged {
                    from: current.status,
                    to: EventStatus::PendingReview,
                },
            )
            .await?;

        self.record_audit(AuditEntry::new(id, AuditAction::Submitted, actor, json!({})))
            .await;
        self.touch_feed().await;
        metrics::record_event_mutation("submit", "ok");

        info!(event_id = %id, "事件已提交审核");
        Ok(saved)
    }

    /// 重新打开：rejected / failed -> draft，本轮审核记录归档
    #[instrument(skip(self), fields(event_id = %id))]
    pub async fn reopen(
        &self,
        id: Uuid,
        expected_version: Option<i64>,
        actor: Option<Uuid>,
    ) -> Result<Event> {
        let current = self.get(id).await?;
        ensure_version(&current, expected_version)?;
        if !matches!(current.status, EventStatus::Rejected | EventStatus::Failed) {
            return Err(EventError::InvalidState {
                id,
                status: current.status,
                operation: "reopen",
            });
        }

        let mut next = transitioned(&current, EventStatus::Draft)?;
        if let Some(record) = next.moderation.take() {
            next.moderation_history.push(record);
        }

        let saved = self
            .commit(
                &current,
                next,
                DomainEventKind::StatusChanged {
                    from: current.status,
                    to: EventStatus::Draft,
                },
            )
            .await?;

        self.record_audit(AuditEntry::new(
            id,
            AuditAction::Reopened,
            actor,
            json!({ "from": current.status }),
        ))
        .await;
        self.touch_feed().await;
        metrics::record_event_mutation("reopen", "ok");

        info!(event_id = %id, from = %current.status, "事件已重新打开");
        Ok(saved)
    }

    // ==================== 内部构件 ====================

    /// CAS 写入并发布领域事件
    ///
    /// 以 `current.version` 作为期望版本，成功后 version 加一
    pub(crate) async fn commit(
        &self,
        current: &Event,
        mut next: Event,
        kind: DomainEventKind,
    ) -> Result<Event> {
        next.updated_at = Utc::now();
        let saved = self.store.compare_and_swap(&next, current.version).await?;
        self.bus
            .publish(DomainEvent::new(saved.id, saved.version, kind));
        Ok(saved)
    }

    /// 审计写入失败不影响主流程
    pub(crate) async fn record_audit(&self, entry: AuditEntry) {
        if let Err(e) = self.store.append_audit(&entry).await {
            warn!(event_id = %entry.event_id, action = ?entry.action, error = %e, "审计写入失败");
        }
    }

    pub(crate) async fn touch_feed(&self) {
        if let Err(e) = self.store.bump_feed_version().await {
            warn!(error = %e, "feed 版本更新失败");
        }
    }

    async fn remember_tags(&self, event: &Event) {
        if event.tags.is_empty() {
            return;
        }
        let tags: Vec<String> = event.tags.iter().cloned().collect();
        if let Err(e) = self.store.upsert_tags(&tags).await {
            warn!(event_id = %event.id, error = %e, "标签目录更新失败");
        }
    }

    fn resolve_channels(&self, raw: &[String]) -> Result<BTreeSet<ChannelName>> {
        let channels = normalize_channels(raw);
        if let Some(bad) = channels
            .iter()
            .find(|c| c.as_str().chars().count() > MAX_CHANNEL_NAME_CHARS)
        {
            return Err(EventError::Validation(format!("渠道名称过长: {}", bad)));
        }
        let channels = if channels.is_empty() {
            self.default_channels.clone()
        } else {
            channels
        };
        if channels.is_empty() {
            return Err(EventError::Validation(
                "至少需要一个广播渠道（未配置默认渠道）".to_string(),
            ));
        }
        Ok(channels)
    }
}

fn validate_tags(raw: &[String]) -> Result<BTreeSet<String>> {
    let tags = normalize_tags(raw);
    if let Some(bad) = tags.iter().find(|t| t.chars().count() > MAX_TAG_CHARS) {
        return Err(EventError::Validation(format!(
            "标签长度不能超过 {} 个字符: {}",
            MAX_TAG_CHARS, bad
        )));
    }
    Ok(tags)
}

/// 校验期望版本；未提供时视为使用刚读到的版本
pub(crate) fn ensure_version(event: &Event, expected: Option<i64>) -> Result<()> {
    match expected {
        Some(expected) if expected != event.version => Err(EventError::Conflict {
            id: event.id,
            expected,
            actual: event.version,
        }),
        _ => Ok(()),
    }
}

/// 按状态机计算迁移后的事件（不落库）
///
/// 进入 broadcasting 时开启新的广播轮次；首次进入 broadcasted 时记录发布时间
pub(crate) fn transitioned(current: &Event, to: EventStatus) -> Result<Event> {
    if !current.status.can_transition_to(to) {
        return Err(EventError::IllegalTransition {
            from: current.status,
            to,
        });
    }

    let mut next = current.clone();
    next.status = to;
    match to {
        EventStatus::Broadcasting => next.broadcast_round += 1,
        EventStatus::Broadcasted if next.published_at.is_none() => {
            next.published_at = Some(Utc::now());
        }
        _ => {}
    }
    Ok(next)
}

fn validate_title(title: Option<&str>) -> Result<String> {
    let title = title.map(str::trim).unwrap_or_default();
    if title.is_empty() {
        return Err(EventError::Validation("title 不能为空".to_string()));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(EventError::Validation(format!(
            "title 长度不能超过 {} 个字符",
            MAX_TITLE_CHARS
        )));
    }
    Ok(title.to_string())
}

//! 事件领域模型

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::enums::{AuditAction, DeliveryState, EventStatus, ModerationDecision};

/// 渠道名称
///
/// 统一小写并去除首尾空白，作为 `(event_id, channel)` 幂等键的一部分
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for ChannelName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for ChannelName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<ChannelName> for String {
    fn from(value: ChannelName) -> Self {
        value.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 把原始渠道列表规整为去重、去空的集合
pub fn normalize_channels<I, S>(raw: I) -> BTreeSet<ChannelName>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(ChannelName::new)
        .filter(|c| !c.is_empty())
        .collect()
}

/// 标签统一小写去空白
pub fn normalize_tags<I, S>(raw: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// 附件引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// 审核记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationRecord {
    pub moderator_id: Uuid,
    pub decision: ModerationDecision,
    pub notes: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// 单次发送尝试
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub attempt: u32,
    pub round: u32,
    pub attempted_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// 单个渠道的投递记录
///
/// `history` 只追加；`attempt_count` 累计所有轮次的尝试次数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDelivery {
    pub state: DeliveryState,
    pub success: bool,
    pub error: Option<String>,
    pub attempt_count: u32,
    pub attempted_at: Option<DateTime<Utc>>,
    /// 当前认领的租约起点
    pub claimed_at: Option<DateTime<Utc>>,
    /// 当前认领者标识，发送结果只有认领者才能写入
    pub claim_id: Option<Uuid>,
    /// 该记录最近一次被认领时所属的广播轮次
    pub round: u32,
    /// 渠道返回的消息 ID
    pub external_id: Option<String>,
    #[serde(default)]
    pub history: Vec<DeliveryAttempt>,
}

impl ChannelDelivery {
    /// 认领是否仍在租约内
    pub fn is_claim_live(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.state == DeliveryState::InFlight
            && self.claimed_at.is_some_and(|claimed| now - claimed < ttl)
    }
}

/// 事件（公告）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
    pub tags: BTreeSet<String>,
    /// 当前广播轮次请求的渠道
    pub channels: BTreeSet<ChannelName>,
    pub created_by: Uuid,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: EventStatus,
    pub moderation: Option<ModerationRecord>,
    #[serde(default)]
    pub moderation_history: Vec<ModerationRecord>,
    pub broadcast_record: BTreeMap<ChannelName, ChannelDelivery>,
    /// 每次进入 broadcasting 时递增
    pub broadcast_round: u32,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Event {
    /// 以草稿状态创建新事件，version 从 1 开始
    pub fn new_draft(
        title: String,
        created_by: Uuid,
        channels: BTreeSet<ChannelName>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            title,
            summary: String::new(),
            body: String::new(),
            attachments: Vec::new(),
            tags: BTreeSet::new(),
            channels,
            created_by,
            scheduled_at: None,
            status: EventStatus::Draft,
            moderation: None,
            moderation_history: Vec::new(),
            broadcast_record: BTreeMap::new(),
            broadcast_round: 0,
            version: 1,
            created_at: now,
            updated_at: now,
            published_at: None,
        }
    }

    /// 已成功投递的渠道
    pub fn succeeded_channels(&self) -> BTreeSet<ChannelName> {
        self.broadcast_record
            .iter()
            .filter(|(_, d)| d.state == DeliveryState::Succeeded)
            .map(|(c, _)| c.clone())
            .collect()
    }

    /// 请求渠道中尚未成功的部分
    pub fn pending_channels(&self, requested: &BTreeSet<ChannelName>) -> BTreeSet<ChannelName> {
        let succeeded = self.succeeded_channels();
        requested.difference(&succeeded).cloned().collect()
    }

    /// 本轮是否全部有结果：无 in_flight，且每个请求渠道都已成功或在本轮终态失败
    ///
    /// 没有请求渠道时视为未结束
    pub fn is_round_settled(&self) -> bool {
        if self.channels.is_empty() {
            return false;
        }
        let none_in_flight = self
            .broadcast_record
            .values()
            .all(|d| d.state != DeliveryState::InFlight);

        none_in_flight
            && self
                .channels
                .iter()
                .all(|c| match self.broadcast_record.get(c) {
                    Some(d) => match d.state {
                        DeliveryState::Succeeded => true,
                        DeliveryState::Failed => d.round == self.broadcast_round,
                        DeliveryState::InFlight => false,
                    },
                    None => false,
                })
    }

    /// 本轮请求的渠道全部成功
    ///
    /// 不在 `channels` 中的旧记录只作为历史保留，不影响结果
    pub fn all_requested_succeeded(&self) -> bool {
        !self.channels.is_empty()
            && self.channels.iter().all(|c| {
                self.broadcast_record
                    .get(c)
                    .is_some_and(|d| d.state == DeliveryState::Succeeded)
            })
    }
}

/// 创建事件的输入
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventDraft {
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 为空时使用默认渠道
    #[serde(default)]
    pub channels: Vec<String>,
    pub created_by: Option<Uuid>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// 区分"字段缺省"和"显式 null"
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// 部分更新输入
///
/// `scheduled_at: Some(None)` 表示清除排期
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub scheduled_at: Option<Option<DateTime<Utc>>>,
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.summary.is_none()
            && self.body.is_none()
            && self.attachments.is_none()
            && self.tags.is_none()
            && self.channels.is_none()
            && self.scheduled_at.is_none()
    }

    /// 本次更新涉及的字段名，写入审计
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push("title");
        }
        if self.summary.is_some() {
            fields.push("summary");
        }
        if self.body.is_some() {
            fields.push("body");
        }
        if self.attachments.is_some() {
            fields.push("attachments");
        }
        if self.tags.is_some() {
            fields.push("tags");
        }
        if self.channels.is_some() {
            fields.push("channels");
        }
        if self.scheduled_at.is_some() {
            fields.push("scheduled_at");
        }
        fields
    }
}

/// 列表查询条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    /// 从 1 开始
    pub page: u32,
    pub size: u32,
    /// 仅返回此时间之后创建的事件
    pub since: Option<DateTime<Utc>>,
    pub status: Option<EventStatus>,
}

impl EventQuery {
    pub const DEFAULT_SIZE: u32 = 10;
    pub const MAX_SIZE: u32 = 100;

    /// 越界参数回落到默认值
    pub fn new(
        page: Option<u32>,
        size: Option<u32>,
        since: Option<DateTime<Utc>>,
        status: Option<EventStatus>,
    ) -> Self {
        let page = page.filter(|p| *p >= 1).unwrap_or(1);
        let size = size
            .filter(|s| (1..=Self::MAX_SIZE).contains(s))
            .unwrap_or(Self::DEFAULT_SIZE);
        Self {
            page,
            size,
            since,
            status,
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.size)
    }
}

impl Default for EventQuery {
    fn default() -> Self {
        Self::new(None, None, None, None)
    }
}

/// 分页结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPage {
    pub items: Vec<Event>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
}

/// 审计记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub event_id: Uuid,
    pub action: AuditAction,
    /// 系统动作（调度器、分发器）没有操作者
    pub actor: Option<Uuid>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        event_id: Uuid,
        action: AuditAction,
        actor: Option<Uuid>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_id,
            action,
            actor,
            details,
            created_at: Utc::now(),
        }
    }
}

//! 响应 DTO 定义

use chrono::{DateTime, Utc};
use event_publishing::{Admission, ChannelName, Event, EventPage, EventStatus};
use serde::Serialize;
use uuid::Uuid;

/// API 统一响应
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// 创建成功响应
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    /// 创建成功响应（自定义消息）
    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }
}

/// 列表中的事件摘要，不含正文和投递明细
#[derive(Debug, Clone, Serialize)]
pub struct EventSummaryDto {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    pub tags: Vec<String>,
    pub channels: Vec<ChannelName>,
    pub status: EventStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

impl From<Event> for EventSummaryDto {
    fn from(event: Event) -> Self {
        Self {
            id: event.id,
            title: event.title,
            summary: event.summary,
            tags: event.tags.into_iter().collect(),
            channels: event.channels.into_iter().collect(),
            status: event.status,
            scheduled_at: event.scheduled_at,
            published_at: event.published_at,
            created_at: event.created_at,
            version: event.version,
        }
    }
}

/// 事件列表响应
#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub page: u32,
    pub size: u32,
    pub total: u64,
    pub events: Vec<EventSummaryDto>,
}

impl From<EventPage> for EventListResponse {
    fn from(page: EventPage) -> Self {
        Self {
            page: page.page,
            size: page.size,
            total: page.total,
            events: page.items.into_iter().map(EventSummaryDto::from).collect(),
        }
    }
}

/// 广播受理结果
#[derive(Debug, Serialize)]
pub struct BroadcastAcceptedDto {
    pub event_id: Uuid,
    pub message: &'static str,
    pub channels: Vec<ChannelName>,
    pub status: EventStatus,
    pub queued: bool,
}

impl From<Admission> for BroadcastAcceptedDto {
    fn from(admission: Admission) -> Self {
        let message = if admission.queued {
            "broadcast queued"
        } else {
            "nothing to broadcast"
        };
        Self {
            event_id: admission.event_id,
            message,
            channels: admission.channels,
            status: admission.status,
            queued: admission.queued,
        }
    }
}

/// 标签列表
#[derive(Debug, Serialize)]
pub struct TagListDto {
    pub tags: Vec<String>,
}

impl TagListDto {
    pub fn new(tags: Vec<String>) -> Self {
        Self { tags }
    }
}

//! 请求 DTO 定义
//!
//! 字段统一 snake_case

use chrono::{DateTime, Utc};
use event_publishing::{
    Attachment, EventDraft, EventPatch, EventQuery, EventStatus, ModerationDecision,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiError;

/// 创建事件请求
#[derive(Debug, Deserialize, Validate)]
pub struct CreateEventRequest {
    #[validate(length(max = 200, message = "标题不能超过200个字符"))]
    pub title: Option<String>,
    pub summary: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    #[validate(length(max = 20, message = "附件不能超过20个"))]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    #[validate(length(max = 20, message = "标签不能超过20个"))]
    pub tags: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    pub created_by: Option<Uuid>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl From<CreateEventRequest> for EventDraft {
    fn from(req: CreateEventRequest) -> Self {
        EventDraft {
            title: req.title,
            summary: req.summary,
            body: req.body,
            attachments: req.attachments,
            tags: req.tags,
            channels: req.channels,
            created_by: req.created_by,
            scheduled_at: req.scheduled_at,
        }
    }
}

/// 部分更新请求
///
/// `scheduled_at: null` 清除排期，字段缺省表示不修改
#[derive(Debug, Deserialize)]
pub struct PatchEventRequest {
    #[serde(flatten)]
    pub patch: EventPatch,
    pub expected_version: Option<i64>,
}

/// 审核请求，`action` 作为 `status` 的别名
#[derive(Debug, Deserialize)]
pub struct ModerateEventRequest {
    #[serde(alias = "action")]
    pub status: ModerationDecision,
    pub moderator_id: Option<Uuid>,
    pub notes: Option<String>,
    pub expected_version: Option<i64>,
}

/// 广播请求，请求体可省略
#[derive(Debug, Default, Deserialize)]
pub struct BroadcastEventRequest {
    #[serde(default)]
    pub channels: Vec<String>,
    pub expected_version: Option<i64>,
}

/// 仅携带期望版本的请求（提交审核、重新打开）
#[derive(Debug, Default, Deserialize)]
pub struct VersionedRequest {
    pub expected_version: Option<i64>,
}

/// 标签建议请求
#[derive(Debug, Default, Deserialize)]
pub struct TagSuggestRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub body: String,
}

/// 标签搜索参数
#[derive(Debug, Default, Deserialize)]
pub struct TagSearchQuery {
    #[serde(default)]
    pub query: String,
}

/// 事件列表查询参数
///
/// 按字符串接收，非法的 page/size 回落到默认值
#[derive(Debug, Default, Deserialize)]
pub struct ListEventsQuery {
    pub page: Option<String>,
    pub size: Option<String>,
    /// RFC3339 时间
    pub since: Option<String>,
    pub status: Option<String>,
}

impl ListEventsQuery {
    pub fn into_query(self) -> Result<EventQuery, ApiError> {
        let page = self.page.and_then(|p| p.trim().parse().ok());
        let size = self.size.and_then(|s| s.trim().parse().ok());

        let since = match self.since.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|_| ApiError::Validation(format!("since 不是合法的 RFC3339 时间: {}", raw)))?,
            ),
            None => None,
        };

        let status = match self.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                raw.parse::<EventStatus>()
                    .map_err(|_| ApiError::Validation(format!("未知的事件状态: {}", raw)))?,
            ),
            None => None,
        };

        Ok(EventQuery::new(page, size, since, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moderate_accepts_action_alias() {
        let req: ModerateEventRequest = serde_json::from_str(
            r#"{"action": "approve", "moderator_id": "6f9619ff-8b86-d011-b42d-00cf4fc964ff"}"#,
        )
        .unwrap();
        assert_eq!(req.status, ModerationDecision::Approve);

        let req: ModerateEventRequest =
            serde_json::from_str(r#"{"status": "rejected", "notes": "typo"}"#).unwrap();
        assert_eq!(req.status, ModerationDecision::Reject);
        assert!(req.moderator_id.is_none());
    }

    #[test]
    fn test_patch_request_keeps_null_schedule() {
        let req: PatchEventRequest =
            serde_json::from_str(r#"{"scheduled_at": null, "expected_version": 3}"#).unwrap();
        assert_eq!(req.patch.scheduled_at, Some(None));
        assert_eq!(req.expected_version, Some(3));
    }

    #[test]
    fn test_list_query_parsing() {
        let query = ListEventsQuery {
            page: Some("abc".to_string()),
            size: Some("25".to_string()),
            since: Some("2026-01-01T00:00:00Z".to_string()),
            status: Some("broadcasted".to_string()),
        }
        .into_query()
        .unwrap();
        assert_eq!(query.page, 1);
        assert_eq!(query.size, 25);
        assert!(query.since.is_some());
        assert_eq!(query.status, Some(EventStatus::Broadcasted));

        let err = ListEventsQuery {
            since: Some("yesterday".to_string()),
            ..Default::default()
        }
        .into_query()
        .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }
}

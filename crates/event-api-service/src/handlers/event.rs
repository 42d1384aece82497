//! 事件生命周期 API 处理器
//!
//! 创建、查询、编辑、提交审核、重新打开和审计轨迹

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use event_publishing::{AuditEntry, Event, EventDraft};
use tracing::{debug, info};
use validator::Validate;

use crate::{
    dto::{
        ApiResponse, CreateEventRequest, EventListResponse, ListEventsQuery, PatchEventRequest,
        VersionedRequest,
    },
    error::{ApiError, Result},
    extract::{Actor, ApiJson, EventId, OptionalJson},
    state::AppState,
};

/// 创建事件
///
/// POST /api/v1/events
pub async fn create_event(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ApiJson(req): ApiJson<CreateEventRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Event>>)> {
    req.validate()?;

    let mut draft = EventDraft::from(req);
    // 请求体未指定作者时使用操作者请求头
    if draft.created_by.is_none() {
        draft.created_by = actor;
    }

    let event = state.events.create(draft).await?;
    info!(event_id = %event.id, "Event created");

    Ok((StatusCode::CREATED, Json(ApiResponse::success(event))))
}

/// 查询单个事件
///
/// GET /api/v1/events/{id}
pub async fn get_event(
    State(state): State<AppState>,
    EventId(id): EventId,
) -> Result<Json<ApiResponse<Event>>> {
    let event = state.events.get(id).await?;
    Ok(Json(ApiResponse::success(event)))
}

/// 事件列表
///
/// GET /api/v1/events?page=&size=&since=&status=
///
/// ETag 为 feed 版本号，`If-None-Match` 命中时返回 304
pub async fn list_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListEventsQuery>,
) -> Result<Response> {
    let query = params.into_query()?;

    let feed_version = state.events.feed_version().await?;
    let etag = format!("\"{}\"", feed_version);
    let etag_value = HeaderValue::from_str(&etag)
        .map_err(|e| ApiError::Internal(format!("ETag 生成失败: {}", e)))?;

    if if_none_match(&headers, feed_version) {
        debug!(feed_version, "Feed not modified");
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag_value)]).into_response());
    }

    let page = state.events.list(&query).await?;
    let body = Json(ApiResponse::success(EventListResponse::from(page)));

    Ok(([(header::ETAG, etag_value)], body).into_response())
}

/// 判断 `If-None-Match` 是否包含当前 feed 版本
///
/// 兼容带引号、弱校验前缀 `W/` 和逗号分隔的多个值
fn if_none_match(headers: &HeaderMap, feed_version: i64) -> bool {
    let Some(raw) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    let current = feed_version.to_string();
    raw.split(',').any(|candidate| {
        let tag = candidate.trim();
        let tag = tag.strip_prefix("W/").unwrap_or(tag);
        tag == "*" || tag.trim_matches('"') == current
    })
}

/// 编辑事件
///
/// PATCH /api/v1/events/{id}
pub async fn patch_event(
    State(state): State<AppState>,
    EventId(id): EventId,
    ApiJson(req): ApiJson<PatchEventRequest>,
) -> Result<Json<ApiResponse<Event>>> {
    let event = state
        .events
        .patch(id, req.patch, req.expected_version)
        .await?;

    info!(event_id = %id, version = event.version, "Event updated");

    Ok(Json(ApiResponse::success(event)))
}

/// 提交审核
///
/// POST /api/v1/events/{id}/submit
pub async fn submit_event(
    State(state): State<AppState>,
    EventId(id): EventId,
    Actor(actor): Actor,
    OptionalJson(req): OptionalJson<VersionedRequest>,
) -> Result<Json<ApiResponse<Event>>> {
    let event = state.events.submit(id, req.expected_version, actor).await?;
    Ok(Json(ApiResponse::success(event)))
}

/// 重新打开被驳回或广播失败的事件
///
/// POST /api/v1/events/{id}/reopen
pub async fn reopen_event(
    State(state): State<AppState>,
    EventId(id): EventId,
    Actor(actor): Actor,
    OptionalJson(req): OptionalJson<VersionedRequest>,
) -> Result<Json<ApiResponse<Event>>> {
    let event = state.events.reopen(id, req.expected_version, actor).await?;
    Ok(Json(ApiResponse::success(event)))
}

/// 审计轨迹
///
/// GET /api/v1/events/{id}/audit
pub async fn get_audit_trail(
    State(state): State<AppState>,
    EventId(id): EventId,
) -> Result<Json<ApiResponse<Vec<AuditEntry>>>> {
    let entries = state.events.audit_trail(id).await?;
    Ok(Json(ApiResponse::success(entries)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_if_none_match_variants() {
        assert!(if_none_match(&headers_with("\"7\""), 7));
        assert!(if_none_match(&headers_with("W/\"7\""), 7));
        assert!(if_none_match(&headers_with("\"3\", \"7\""), 7));
        assert!(if_none_match(&headers_with("*"), 7));
        assert!(!if_none_match(&headers_with("\"6\""), 7));
        assert!(!if_none_match(&HeaderMap::new(), 7));
    }
}

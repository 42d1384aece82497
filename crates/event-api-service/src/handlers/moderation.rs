//! 审核 API 处理器

use axum::{Json, extract::State};
use event_publishing::{Event, ModerationRequest};
use tracing::info;

use crate::{
    dto::{ApiResponse, ModerateEventRequest},
    error::{ApiError, Result},
    extract::{ACTOR_HEADER, Actor, ApiJson, EventId},
    state::AppState,
};

/// 审核事件
///
/// POST /api/v1/events/{id}/moderate
///
/// 审核员取请求体的 `moderator_id`，缺省时取操作者请求头
pub async fn moderate_event(
    State(state): State<AppState>,
    EventId(id): EventId,
    Actor(actor): Actor,
    ApiJson(req): ApiJson<ModerateEventRequest>,
) -> Result<Json<ApiResponse<Event>>> {
    let moderator_id = req.moderator_id.or(actor).ok_or_else(|| {
        ApiError::Validation(format!("缺少 moderator_id 或 {} 请求头", ACTOR_HEADER))
    })?;

    let event = state
        .moderation
        .moderate(
            id,
            ModerationRequest {
                moderator_id,
                decision: req.status,
                notes: req.notes,
                expected_version: req.expected_version,
            },
        )
        .await?;

    info!(
        event_id = %id,
        moderator_id = %moderator_id,
        status = %event.status,
        "Event moderated"
    );

    Ok(Json(ApiResponse::success(event)))
}

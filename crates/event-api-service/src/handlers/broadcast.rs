//! 广播 API 处理器

use axum::{Json, extract::State};
use event_publishing::normalize_channels;
use tracing::info;

use crate::{
    dto::{ApiResponse, BroadcastAcceptedDto, BroadcastEventRequest},
    error::Result,
    extract::{Actor, EventId, OptionalJson},
    state::AppState,
};

/// 触发广播
///
/// POST /api/v1/events/{id}/broadcast
///
/// 受理后立即返回，实际投递由后台 Worker 完成，结果见事件的 `broadcast_record`
pub async fn broadcast_event(
    State(state): State<AppState>,
    EventId(id): EventId,
    Actor(actor): Actor,
    OptionalJson(req): OptionalJson<BroadcastEventRequest>,
) -> Result<Json<ApiResponse<BroadcastAcceptedDto>>> {
    let channels = normalize_channels(&req.channels);

    let admission = state
        .broadcasts
        .request_broadcast(id, channels, req.expected_version, actor)
        .await?;

    info!(
        event_id = %id,
        channels = ?admission.channels,
        queued = admission.queued,
        "Broadcast admitted"
    );

    Ok(Json(ApiResponse::success(BroadcastAcceptedDto::from(admission))))
}

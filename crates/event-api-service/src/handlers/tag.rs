//! 标签 API 处理器

use axum::{
    Json,
    extract::{Query, State},
};
use event_publishing::suggest_tags;

use crate::{
    dto::{ApiResponse, TagListDto, TagSearchQuery, TagSuggestRequest},
    error::Result,
    extract::ApiJson,
    state::AppState,
};

/// 根据标题、摘要和正文建议标签
///
/// POST /api/v1/events/tag-suggest
pub async fn suggest(ApiJson(req): ApiJson<TagSuggestRequest>) -> Json<ApiResponse<TagListDto>> {
    let tags = suggest_tags(&req.title, &req.summary, &req.body);
    Json(ApiResponse::success(TagListDto::new(tags)))
}

/// 搜索标签目录
///
/// GET /api/v1/tags?query=
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<TagSearchQuery>,
) -> Result<Json<ApiResponse<TagListDto>>> {
    let tags = state.events.search_tags(params.query.trim()).await?;
    Ok(Json(ApiResponse::success(TagListDto::new(tags))))
}

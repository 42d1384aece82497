//! 路由配置模块
//!
//! 定义 REST API 端点映射和中间件栈

use std::time::Duration;

use axum::{
    Router, middleware,
    http::{HeaderValue, StatusCode},
    routing::{get, post},
};
use broadcast_shared::{config::ServerConfig, observability::middleware as obs_middleware};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use tracing::{info, warn};

use crate::{handlers, state::AppState};

/// 构建事件相关路由（挂载在 /api/v1 下）
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/events",
            get(handlers::event::list_events).post(handlers::event::create_event),
        )
        // 静态段优先于 {id}
        .route("/events/tag-suggest", post(handlers::tag::suggest))
        .route(
            "/events/{id}",
            get(handlers::event::get_event).patch(handlers::event::patch_event),
        )
        .route("/events/{id}/submit", post(handlers::event::submit_event))
        .route("/events/{id}/reopen", post(handlers::event::reopen_event))
        .route(
            "/events/{id}/moderate",
            post(handlers::moderation::moderate_event),
        )
        .route(
            "/events/{id}/broadcast",
            post(handlers::broadcast::broadcast_event),
        )
        .route("/events/{id}/audit", get(handlers::event::get_audit_trail))
        .route("/tags", get(handlers::tag::search))
}

/// 构建完整应用路由
///
/// 中间件自下而上生效：CORS、请求 ID、HTTP 追踪、请求超时
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .nest("/api/v1", api_routes())
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs.max(1)),
        ))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .layer(cors_layer(config))
        .with_state(state)
}

/// 按配置构建 CORS，未配置来源时允许任意来源
fn cors_layer(config: &ServerConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.trim().parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "忽略无效的 CORS 来源");
                None
            }
        })
        .collect();
    info!(origins = ?config.cors_origins, "CORS allowed origins");

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

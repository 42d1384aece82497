//! 健康检查

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};
use tracing::warn;

use crate::state::AppState;

const SERVICE_NAME: &str = "event-api-service";

/// 存活探针
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME
    }))
}

/// 就绪探针：存储可读，postgres 后端时数据库可用
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let store_ok = state.events.feed_version().await.is_ok();
    let database = match &state.database {
        Some(db) => Some(db.ping().await),
        None => None,
    };
    let database_ok = database.as_ref().is_none_or(|ping| ping.is_ok());
    let all_ok = store_ok && database_ok;

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if all_ok { "ok" } else { "degraded" },
            "service": SERVICE_NAME,
            "checks": {
                "store": if store_ok { "ok" } else { "fail" },
                "database": match &database {
                    None => json!({ "status": "skipped" }),
                    Some(Ok(latency)) => json!({
                        "status": "ok",
                        "latency_ms": latency.as_millis() as u64,
                    }),
                    Some(Err(e)) => {
                        warn!(error = %e, "数据库就绪检查失败");
                        json!({ "status": "fail" })
                    }
                }
            }
        })),
    )
}

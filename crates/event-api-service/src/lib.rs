//! 事件发布 HTTP API 服务
//!
//! 对外提供事件的创建、编辑、审核、广播和查询接口，
//! 并负责装配定时发布与广播分发两个后台 Worker。
//!
//! ## 模块结构
//!
//! - `app`: 按配置装配服务与 Worker
//! - `dto`: 请求与响应结构
//! - `error`: API 错误与 HTTP 状态码映射
//! - `extract`: 自定义提取器
//! - `handlers`: 请求处理器
//! - `routes`: 路由与中间件
//! - `state`: 共享状态

pub mod app;
pub mod dto;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod routes;
pub mod state;

pub use app::{Assembly, assemble};
pub use error::ApiError;
pub use routes::build_router;
pub use state::AppState;

//! 共享库
//!
//! 包含事件发布服务各 crate 共用的配置、错误处理、重试策略、数据库连接与可观测性基础设施。

pub mod config;
pub mod database;
pub mod error;
pub mod observability;
pub mod retry;

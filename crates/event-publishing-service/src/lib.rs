//! 事件发布服务
//!
//! 企业内部公告（事件）从起草到多渠道广播的完整生命周期。
//!
//! ## 核心功能
//!
//! - **生命周期**：起草、编辑、提交审核、重新打开，所有迁移受状态机约束
//! - **审核闸门**：审核员通过或驳回，每轮只能审核一次
//! - **定时发布**：审核通过且带排期的事件到点进入广播
//! - **广播分发**：多渠道并发投递，按渠道记录结果并重试
//! - **审计**：每次变更写入审计轨迹
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `store`: 事件存储（内存与 PostgreSQL）
//! - `bus`: 进程内领域事件总线
//! - `service`: 生命周期服务
//! - `moderation`: 审核闸门与权限
//! - `scheduler`: 定时发布 Worker
//! - `broadcast`: 渠道适配器、分发器与广播 Worker
//! - `tags`: 标签建议

pub mod broadcast;
pub mod bus;
pub mod error;
pub mod models;
pub mod moderation;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod tags;

pub use broadcast::{
    Admission, BroadcastDispatcher, BroadcastService, BroadcastWorker, ChannelAdapter,
    ChannelError, ChannelReceipt, ChannelRegistry, DispatchReport, broadcast_pipeline,
};
pub use bus::{DomainEvent, DomainEventBus, DomainEventKind};
pub use error::{EventError, Result};
pub use models::*;
pub use moderation::{
    ModerationGate, ModerationRequest, ModeratorAuthorizer, StaticModeratorAuthorizer,
};
pub use scheduler::SchedulerWorker;
pub use service::{EventService, TAG_SEARCH_LIMIT};
pub use store::{EventStore, MemoryEventStore, PgEventStore};
pub use tags::suggest_tags;

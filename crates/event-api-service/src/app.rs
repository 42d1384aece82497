//! 组件装配
//!
//! 按配置构建服务、审核闸门、渠道注册表和后台 Worker

use std::sync::Arc;
use std::time::Duration;

use broadcast_shared::config::AppConfig;
use event_publishing::{
    BroadcastDispatcher, BroadcastWorker, ChannelRegistry, DomainEventBus, EventError,
    EventService, EventStore, ModerationGate, SchedulerWorker, StaticModeratorAuthorizer,
    broadcast_pipeline, normalize_channels,
};
use tracing::info;

use crate::state::AppState;

/// 装配结果：HTTP 状态和待启动的后台 Worker
pub struct Assembly {
    pub state: AppState,
    pub scheduler: SchedulerWorker,
    pub broadcast_worker: BroadcastWorker,
}

/// 基于给定存储装配整个应用
pub fn assemble(
    config: &AppConfig,
    store: Arc<dyn EventStore>,
) -> event_publishing::Result<Assembly> {
    let bus = Arc::new(DomainEventBus::default());
    let events = EventService::new(
        store,
        bus,
        normalize_channels(&config.broadcast.default_channels),
    );

    let authorizer = Arc::new(StaticModeratorAuthorizer::from_config(&config.moderation)?);
    let moderation = ModerationGate::new(events.clone(), authorizer);

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| EventError::Internal(format!("HTTP 客户端初始化失败: {}", e)))?;
    let registry = Arc::new(ChannelRegistry::from_config(&config.channels, client));
    info!(channels = ?registry.names(), "渠道适配器已注册");

    let dispatcher = BroadcastDispatcher::from_config(events.clone(), registry, &config.broadcast);
    let (broadcasts, broadcast_worker) = broadcast_pipeline(dispatcher, &config.broadcast);
    let scheduler = SchedulerWorker::new(events.clone(), &config.scheduler);

    Ok(Assembly {
        state: AppState::new(events, moderation, broadcasts),
        scheduler,
        broadcast_worker,
    })
}

//! 应用状态定义

use broadcast_shared::database::Database;
use event_publishing::{BroadcastService, EventService, ModerationGate};

/// Axum 应用共享状态
///
/// 各服务内部持有 Arc，克隆开销很小
#[derive(Clone)]
pub struct AppState {
    pub events: EventService,
    pub moderation: ModerationGate,
    pub broadcasts: BroadcastService,
    /// 仅 postgres 后端存在，用于就绪探针
    pub database: Option<Database>,
}

impl AppState {
    pub fn new(events: EventService, moderation: ModerationGate, broadcasts: BroadcastService) -> Self {
        Self {
            events,
            moderation,
            broadcasts,
            database: None,
        }
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }
}

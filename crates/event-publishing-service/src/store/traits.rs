//! 事件存储 Trait 定义
//!
//! 服务层依赖抽象而非具体实现，支持内存/Postgres 两种后端和 mock 测试

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{AuditEntry, Event, EventPage, EventQuery};

/// 事件存储接口
///
/// `compare_and_swap` 是唯一的并发控制原语：只有当存储中的 version
/// 等于 `expected_version` 时写入成功，写入后 version 为 `expected_version + 1`。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventStore: Send + Sync {
    // 事件
    async fn insert(&self, event: &Event) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Event>>;
    /// 按创建时间倒序分页
    async fn list(&self, query: &EventQuery) -> Result<EventPage>;
    /// 版本不匹配返回 `Conflict`，记录不存在返回 `NotFound`
    async fn compare_and_swap(&self, event: &Event, expected_version: i64) -> Result<Event>;
    /// status = scheduled 且 scheduled_at <= now，按 scheduled_at 升序
    async fn list_due_scheduled(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Event>>;

    // 审计
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;
    async fn list_audit(&self, event_id: Uuid) -> Result<Vec<AuditEntry>>;

    // Feed 版本（列表 ETag）
    async fn feed_version(&self) -> Result<i64>;
    async fn bump_feed_version(&self) -> Result<i64>;

    // 标签目录
    async fn upsert_tags(&self, tags: &[String]) -> Result<()>;
    /// 前缀/包含匹配，不区分大小写，按字母序
    async fn search_tags(&self, query: &str, limit: usize) -> Result<Vec<String>>;
}

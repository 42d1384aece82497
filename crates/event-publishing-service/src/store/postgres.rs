//! Postgres 事件存储
//!
//! 事件的可变集合字段（附件、标签、渠道、审核、投递记录）以 JSONB 列保存，
//! CAS 通过 `UPDATE ... WHERE id = $1 AND version = $2` 实现。

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::{info, instrument};
use uuid::Uuid;

use super::traits::EventStore;
use crate::error::{EventError, Result};
use crate::models::{
    Attachment, AuditAction, AuditEntry, ChannelDelivery, ChannelName, Event, EventPage,
    EventQuery, EventStatus, ModerationRecord,
};

const EVENT_COLUMNS: &str = r#"
    id, title, summary, body, attachments, tags, channels, created_by, scheduled_at,
    status, moderation, moderation_history, broadcast_record, broadcast_round, version,
    created_at, updated_at, published_at
"#;

/// 数据库查询结果行结构
#[derive(FromRow)]
struct EventRow {
    id: Uuid,
    title: String,
    summary: String,
    body: String,
    attachments: Json<Vec<Attachment>>,
    tags: Json<BTreeSet<String>>,
    channels: Json<BTreeSet<ChannelName>>,
    created_by: Uuid,
    scheduled_at: Option<DateTime<Utc>>,
    status: EventStatus,
    moderation: Option<Json<ModerationRecord>>,
    moderation_history: Json<Vec<ModerationRecord>>,
    broadcast_record: Json<BTreeMap<ChannelName, ChannelDelivery>>,
    broadcast_round: i32,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            summary: row.summary,
            body: row.body,
            attachments: row.attachments.0,
            tags: row.tags.0,
            channels: row.channels.0,
            created_by: row.created_by,
            scheduled_at: row.scheduled_at,
            status: row.status,
            moderation: row.moderation.map(|m| m.0),
            moderation_history: row.moderation_history.0,
            broadcast_record: row.broadcast_record.0,
            broadcast_round: row.broadcast_round.max(0) as u32,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            published_at: row.published_at,
        }
    }
}

#[derive(FromRow)]
struct AuditRow {
    id: Uuid,
    event_id: Uuid,
    action: AuditAction,
    actor: Option<Uuid>,
    details: Json<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl From<AuditRow> for AuditEntry {
    fn from(row: AuditRow) -> Self {
        Self {
            id: row.id,
            event_id: row.event_id,
            action: row.action,
            actor: row.actor,
            details: row.details.0,
            created_at: row.created_at,
        }
    }
}

/// Postgres 事件存储
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 执行内置迁移
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        info!("Running event store migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EventError::Internal(format!("数据库迁移失败: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn insert(&self, event: &Event) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (
                id, title, summary, body, attachments, tags, channels, created_by, scheduled_at,
                status, moderation, moderation_history, broadcast_record, broadcast_round, version,
                created_at, updated_at, published_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(event.id)
        .bind(&event.title)
        .bind(&event.summary)
        .bind(&event.body)
        .bind(Json(&event.attachments))
        .bind(Json(&event.tags))
        .bind(Json(&event.channels))
        .bind(event.created_by)
        .bind(event.scheduled_at)
        .bind(event.status)
        .bind(event.moderation.as_ref().map(Json))
        .bind(Json(&event.moderation_history))
        .bind(Json(&event.broadcast_record))
        .bind(event.broadcast_round as i32)
        .bind(event.version)
        .bind(event.created_at)
        .bind(event.updated_at)
        .bind(event.published_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Event>> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {} FROM events WHERE id = $1",
            EVENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Event::from))
    }

    async fn list(&self, query: &EventQuery) -> Result<EventPage> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM events
            WHERE ($1::timestamptz IS NULL OR created_at > $1)
              AND ($2::varchar IS NULL OR status = $2)
            "#,
        )
        .bind(query.since)
        .bind(query.status)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {} FROM events
            WHERE ($1::timestamptz IS NULL OR created_at > $1)
              AND ($2::varchar IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
            EVENT_COLUMNS
        ))
        .bind(query.since)
        .bind(query.status)
        .bind(i64::from(query.size))
        .bind(query.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(EventPage {
            items: rows.into_iter().map(Event::from).collect(),
            total: total.max(0) as u64,
            page: query.page,
            size: query.size,
        })
    }

    async fn compare_and_swap(&self, event: &Event, expected_version: i64) -> Result<Event> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            UPDATE events SET
                title = $3, summary = $4, body = $5, attachments = $6, tags = $7,
                channels = $8, scheduled_at = $9, status = $10, moderation = $11,
                moderation_history = $12, broadcast_record = $13, broadcast_round = $14,
                updated_at = $15, published_at = $16, version = $2 + 1
            WHERE id = $1 AND version = $2
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(event.id)
        .bind(expected_version)
        .bind(&event.title)
        .bind(&event.summary)
        .bind(&event.body)
        .bind(Json(&event.attachments))
        .bind(Json(&event.tags))
        .bind(Json(&event.channels))
        .bind(event.scheduled_at)
        .bind(event.status)
        .bind(event.moderation.as_ref().map(Json))
        .bind(Json(&event.moderation_history))
        .bind(Json(&event.broadcast_record))
        .bind(event.broadcast_round as i32)
        .bind(event.updated_at)
        .bind(event.published_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(row.into());
        }

        // 未更新：区分记录不存在与版本冲突
        let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM events WHERE id = $1")
            .bind(event.id)
            .fetch_optional(&self.pool)
            .await?;

        match actual {
            Some(actual) => Err(EventError::Conflict {
                id: event.id,
                expected: expected_version,
                actual,
            }),
            None => Err(EventError::NotFound(event.id)),
        }
    }

    async fn list_due_scheduled(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {} FROM events
            WHERE status = $1 AND scheduled_at <= $2
            ORDER BY scheduled_at ASC
            LIMIT $3
            "#,
            EVENT_COLUMNS
        ))
        .bind(EventStatus::Scheduled)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Event::from).collect())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO event_audit (id, event_id, action, actor, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(entry.event_id)
        .bind(entry.action)
        .bind(entry.actor)
        .bind(Json(&entry.details))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_audit(&self, event_id: Uuid) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, event_id, action, actor, details, created_at
            FROM event_audit
            WHERE event_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }

    async fn feed_version(&self) -> Result<i64> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM feed_meta WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(version.unwrap_or(0))
    }

    async fn bump_feed_version(&self) -> Result<i64> {
        let version: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO feed_meta (id, version) VALUES (1, 1)
            ON CONFLICT (id) DO UPDATE SET version = feed_meta.version + 1
            RETURNING version
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(version)
    }

    async fn upsert_tags(&self, tags: &[String]) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO tags (name)
            SELECT UNNEST($1::varchar[])
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(tags)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn search_tags(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        let pattern = format!("%{}%", query.trim());
        let tags: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT name FROM tags
            WHERE name ILIKE $1
            ORDER BY name ASC
            LIMIT $2
            "#,
        )
        .bind(pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(tags)
    }
}

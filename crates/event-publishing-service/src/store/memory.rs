//! 内存事件存储
//!
//! 以事件 ID 为键的 DashMap 分片存储，CAS 只持有单条记录所在分片的锁，
//! 适用于开发、测试和单实例部署。

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use super::traits::EventStore;
use crate::error::{EventError, Result};
use crate::models::{AuditEntry, Event, EventPage, EventQuery, EventStatus};

#[derive(Debug, Clone, Default)]
pub struct MemoryEventStore {
    events: Arc<DashMap<Uuid, Event>>,
    audit: Arc<DashMap<Uuid, Vec<AuditEntry>>>,
    tags: Arc<DashSet<String>>,
    feed_version: Arc<AtomicI64>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前存储的事件数
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert(&self, event: &Event) -> Result<()> {
        if self.events.contains_key(&event.id) {
            return Err(EventError::Internal(format!("事件 ID 重复: {}", event.id)));
        }
        self.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Event>> {
        Ok(self.events.get(&id).map(|e| e.value().clone()))
    }

    async fn list(&self, query: &EventQuery) -> Result<EventPage> {
        let mut matched: Vec<Event> = self
            .events
            .iter()
            .filter(|entry| {
                let e = entry.value();
                query.since.is_none_or(|since| e.created_at > since)
                    && query.status.is_none_or(|status| e.status == status)
            })
            .map(|entry| entry.value().clone())
            .collect();

        // UUID v7 按时间有序，作为同一时刻创建时的次序
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.size as usize)
            .collect();

        Ok(EventPage {
            items,
            total,
            page: query.page,
            size: query.size,
        })
    }

    async fn compare_and_swap(&self, event: &Event, expected_version: i64) -> Result<Event> {
        let mut current = self
            .events
            .get_mut(&event.id)
            .ok_or(EventError::NotFound(event.id))?;

        if current.version != expected_version {
            return Err(EventError::Conflict {
                id: event.id,
                expected: expected_version,
                actual: current.version,
            });
        }

        let mut next = event.clone();
        next.version = expected_version + 1;
        *current = next.clone();

        Ok(next)
    }

    async fn list_due_scheduled(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Event>> {
        let mut due: Vec<Event> = self
            .events
            .iter()
            .filter(|entry| {
                let e = entry.value();
                e.status == EventStatus::Scheduled && e.scheduled_at.is_some_and(|at| at <= now)
            })
            .map(|entry| entry.value().clone())
            .collect();

        due.sort_by_key(|e| e.scheduled_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.audit
            .entry(entry.event_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn list_audit(&self, event_id: Uuid) -> Result<Vec<AuditEntry>> {
        Ok(self
            .audit
            .get(&event_id)
            .map(|entries| entries.value().clone())
            .unwrap_or_default())
    }

    async fn feed_version(&self) -> Result<i64> {
        Ok(self.feed_version.load(Ordering::SeqCst))
    }

    async fn bump_feed_version(&self) -> Result<i64> {
        Ok(self.feed_version.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn upsert_tags(&self, tags: &[String]) -> Result<()> {
        for tag in tags {
            self.tags.insert(tag.clone());
        }
        Ok(())
    }

    async fn search_tags(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        let needle = query.trim().to_lowercase();
        let mut found: Vec<String> = self
            .tags
            .iter()
            .filter(|tag| tag.key().contains(&needle))
            .map(|tag| tag.key().clone())
            .collect();
        found.sort();
        found.truncate(limit);
        Ok(found)
    }
}

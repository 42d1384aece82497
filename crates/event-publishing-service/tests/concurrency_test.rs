//! 并发安全集成测试
//!
//! 并发分发、并发定时触发、重新广播时的幂等性

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Behavior, FakeChannel, approved, draft, harness, no_channels};
use event_publishing::{
    AuditAction, AuditEntry, ChannelName, DeliveryState, DomainEventBus, Event, EventError,
    EventPage, EventQuery, EventService, EventStatus, EventStore, MemoryEventStore,
    ModerationDecision, ModerationGate, SchedulerWorker, StaticModeratorAuthorizer,
    broadcast_pipeline, normalize_channels,
};
use broadcast_shared::config::BroadcastConfig;
use uuid::Uuid;

/// 读取后让出执行权的内存存储
///
/// 并发的两个调用者会拿到同一份快照，随后在 CAS 上竞争
struct InterleavingStore {
    inner: MemoryEventStore,
    cas_conflicts: AtomicUsize,
}

impl InterleavingStore {
    fn new() -> Self {
        Self {
            inner: MemoryEventStore::new(),
            cas_conflicts: AtomicUsize::new(0),
        }
    }

    fn cas_conflicts(&self) -> usize {
        self.cas_conflicts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventStore for InterleavingStore {
    async fn insert(&self, event: &Event) -> event_publishing::Result<()> {
        self.inner.insert(event).await
    }

    async fn get(&self, id: Uuid) -> event_publishing::Result<Option<Event>> {
        let found = self.inner.get(id).await;
        tokio::task::yield_now().await;
        found
    }

    async fn list(&self, query: &EventQuery) -> event_publishing::Result<EventPage> {
        self.inner.list(query).await
    }

    async fn compare_and_swap(
        &self,
        event: &Event,
        expected_version: i64,
    ) -> event_publishing::Result<Event> {
        let result = self.inner.compare_and_swap(event, expected_version).await;
        if matches!(result, Err(EventError::Conflict { .. })) {
            self.cas_conflicts.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    async fn list_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> event_publishing::Result<Vec<Event>> {
        let due = self.inner.list_due_scheduled(now, limit).await;
        tokio::task::yield_now().await;
        due
    }

    async fn append_audit(&self, entry: &AuditEntry) -> event_publishing::Result<()> {
        self.inner.append_audit(entry).await
    }

    async fn list_audit(&self, event_id: Uuid) -> event_publishing::Result<Vec<AuditEntry>> {
        self.inner.list_audit(event_id).await
    }

    async fn feed_version(&self) -> event_publishing::Result<i64> {
        self.inner.feed_version().await
    }

    async fn bump_feed_version(&self) -> event_publishing::Result<i64> {
        self.inner.bump_feed_version().await
    }

    async fn upsert_tags(&self, tags: &[String]) -> event_publishing::Result<()> {
        self.inner.upsert_tags(tags).await
    }

    async fn search_tags(&self, query: &str, limit: usize) -> event_publishing::Result<Vec<String>> {
        self.inner.search_tags(query, limit).await
    }
}

#[tokio::test]
async fn test_concurrent_dispatch_sends_once_per_channel() {
    let fcm = FakeChannel::slow("fcm", Duration::from_millis(50));
    let email = FakeChannel::slow("email", Duration::from_millis(50));
    let h = harness(vec![fcm.clone(), email.clone()]);
    let event = approved(&h, &["fcm", "email"]).await;

    let channels = no_channels();
    let (a, b) = tokio::join!(
        h.dispatcher.dispatch(event.id, &channels),
        h.dispatcher.dispatch(event.id, &channels),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(fcm.calls(), 1);
    assert_eq!(email.calls(), 1);
    assert_eq!(a.delivered.len() + b.delivered.len(), 2);

    let finished = h.events.get(event.id).await.unwrap();
    assert_eq!(finished.status, EventStatus::Broadcasted);
    for record in finished.broadcast_record.values() {
        assert_eq!(record.attempt_count, 1);
    }
}

#[tokio::test]
async fn test_many_dispatchers_race_on_one_event() {
    let fcm = FakeChannel::slow("fcm", Duration::from_millis(20));
    let h = Arc::new(harness(vec![fcm.clone()]));
    let event = approved(&h, &["fcm"]).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            h.dispatcher.dispatch(event.id, &no_channels()).await
        }));
    }
    for handle in handles {
        // 输掉竞争的分发者可能看到已汇总完成的事件
        let _ = handle.await.unwrap();
    }

    assert_eq!(fcm.calls(), 1);
    assert_eq!(
        h.events.get(event.id).await.unwrap().status,
        EventStatus::Broadcasted
    );
}

#[tokio::test]
async fn test_concurrent_scheduler_ticks_fire_once() {
    let h = harness(vec![]);
    let mut input = draft("Scheduled", &["fcm"]);
    input.scheduled_at = Some(Utc::now() + chrono::Duration::milliseconds(200));
    let event = h.events.create(input).await.unwrap();
    h.events.submit(event.id, None, None).await.unwrap();
    let scheduled = h
        .gate
        .moderate(event.id, common::decision(ModerationDecision::Approve))
        .await
        .unwrap();
    assert_eq!(scheduled.status, EventStatus::Scheduled);

    let first = SchedulerWorker::with_config(h.events.clone(), 1, 10);
    let second = SchedulerWorker::with_config(h.events.clone(), 1, 10);

    // 到期前不触发
    let (a, b) = tokio::join!(first.tick(Utc::now()), second.tick(Utc::now()));
    assert_eq!(a.unwrap() + b.unwrap(), 0);

    let due = Utc::now() + chrono::Duration::seconds(1);
    let (a, b) = tokio::join!(first.tick(due), second.tick(due));
    assert_eq!(a.unwrap() + b.unwrap(), 1);

    let fired = h.events.get(event.id).await.unwrap();
    assert_eq!(fired.status, EventStatus::Broadcasting);
    assert_eq!(fired.broadcast_round, 1);
    assert_eq!(fired.version, scheduled.version + 1);
}

#[tokio::test]
async fn test_interleaved_scheduler_ticks_race_on_cas() {
    let store = Arc::new(InterleavingStore::new());
    let events = EventService::new(
        store.clone(),
        Arc::new(DomainEventBus::default()),
        normalize_channels(["fcm"]),
    );
    let gate = ModerationGate::new(
        events.clone(),
        Arc::new(StaticModeratorAuthorizer::allow_all()),
    );

    let mut input = draft("Interleaved", &["fcm"]);
    input.scheduled_at = Some(Utc::now() + chrono::Duration::milliseconds(200));
    let event = events.create(input).await.unwrap();
    events.submit(event.id, None, None).await.unwrap();
    let scheduled = gate
        .moderate(event.id, common::decision(ModerationDecision::Approve))
        .await
        .unwrap();
    assert_eq!(scheduled.status, EventStatus::Scheduled);
    assert_eq!(store.cas_conflicts(), 0);

    let first = SchedulerWorker::with_config(events.clone(), 1, 10);
    let second = SchedulerWorker::with_config(events.clone(), 1, 10);

    // 两个 tick 都先拿到同一版本的到期事件，再各自尝试迁移
    let due = Utc::now() + chrono::Duration::seconds(1);
    let (a, b) = tokio::join!(first.tick(due), second.tick(due));
    assert_eq!(a.unwrap() + b.unwrap(), 1);
    assert_eq!(store.cas_conflicts(), 1);

    let fired = events.get(event.id).await.unwrap();
    assert_eq!(fired.status, EventStatus::Broadcasting);
    assert_eq!(fired.broadcast_round, 1);
    assert_eq!(fired.version, scheduled.version + 1);

    let into_broadcasting = events
        .audit_trail(event.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|entry| {
            entry.action == AuditAction::StatusChanged && entry.details["to"] == "broadcasting"
        })
        .count();
    assert_eq!(into_broadcasting, 1);
}

#[tokio::test]
async fn test_rebroadcast_resends_only_failed_channels() {
    let fcm = FakeChannel::new("fcm", Behavior::Succeed);
    let email = FakeChannel::new("email", Behavior::FailTimes(3));
    let h = harness(vec![fcm.clone(), email.clone()]);
    let event = approved(&h, &["fcm", "email"]).await;

    let first = h.dispatcher.dispatch(event.id, &no_channels()).await.unwrap();
    assert_eq!(first.final_status, EventStatus::Failed);
    assert_eq!(email.calls(), 3);

    let (service, _worker) = broadcast_pipeline(h.dispatcher.clone(), &BroadcastConfig::default());
    let admission = service
        .request_broadcast(event.id, no_channels(), None, None)
        .await
        .unwrap();
    assert_eq!(admission.channels, vec![ChannelName::new("email")]);

    let second = h.dispatcher.dispatch(event.id, &no_channels()).await.unwrap();
    assert_eq!(second.round, 2);
    assert_eq!(second.delivered, vec![ChannelName::new("email")]);
    assert_eq!(second.final_status, EventStatus::Broadcasted);

    assert_eq!(fcm.calls(), 1);
    assert_eq!(email.calls(), 4);

    let finished = h.events.get(event.id).await.unwrap();
    let record = &finished.broadcast_record[&ChannelName::new("email")];
    assert_eq!(record.state, DeliveryState::Succeeded);
    assert_eq!(record.attempt_count, 4);
    assert_eq!(record.history.len(), 4);
    assert_eq!(record.history.last().unwrap().round, 2);
    assert_eq!(finished.broadcast_record[&ChannelName::new("fcm")].attempt_count, 1);
}

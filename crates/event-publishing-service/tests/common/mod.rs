//! 集成测试共用的夹具：内存存储、可计数/可失败的渠道适配器

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use broadcast_shared::retry::RetryPolicy;
use event_publishing::{
    BroadcastDispatcher, ChannelAdapter, ChannelError, ChannelReceipt, ChannelRegistry,
    DomainEventBus, Event, EventDraft, EventService, MemoryEventStore, ModerationDecision,
    ModerationGate, ModerationRequest, StaticModeratorAuthorizer, normalize_channels,
};
use uuid::Uuid;

/// 适配器行为
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Succeed,
    /// 总是返回瞬时错误
    AlwaysFail,
    /// 总是返回永久错误
    Reject,
    /// 前 N 次失败，之后成功
    FailTimes(usize),
    /// 每次发送耗时超过超时时间
    Hang,
}

/// 记录调用次数的测试适配器
pub struct FakeChannel {
    name: String,
    behavior: Behavior,
    delay: Duration,
    timeout: Duration,
    calls: AtomicUsize,
}

impl FakeChannel {
    pub fn new(name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior,
            delay: Duration::ZERO,
            timeout: Duration::from_millis(200),
            calls: AtomicUsize::new(0),
        })
    }

    /// 每次发送前等待，用于放大并发窗口
    pub fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior: Behavior::Succeed,
            delay,
            timeout: Duration::from_secs(5),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelAdapter for FakeChannel {
    fn name(&self) -> event_publishing::ChannelName {
        event_publishing::ChannelName::new(&self.name)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send(&self, _event: &Event) -> Result<ChannelReceipt, ChannelError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.behavior {
            Behavior::Succeed => Ok(ChannelReceipt::with_message_id(format!(
                "{}_{}",
                self.name, call
            ))),
            Behavior::AlwaysFail => Err(ChannelError::Transient("smtp relay down".to_string())),
            Behavior::Reject => Err(ChannelError::Permanent("invalid recipient".to_string())),
            Behavior::FailTimes(n) if call < n => {
                Err(ChannelError::Transient(format!("flaky #{}", call)))
            }
            Behavior::FailTimes(_) => Ok(ChannelReceipt::default()),
            Behavior::Hang => {
                tokio::time::sleep(self.timeout * 10).await;
                Ok(ChannelReceipt::default())
            }
        }
    }
}

/// 测试环境：服务、审核闸门、分发器
pub struct Harness {
    pub events: EventService,
    pub gate: ModerationGate,
    pub dispatcher: BroadcastDispatcher,
}

pub fn harness(adapters: Vec<Arc<FakeChannel>>) -> Harness {
    let events = EventService::new(
        Arc::new(MemoryEventStore::new()),
        Arc::new(DomainEventBus::default()),
        normalize_channels(["fcm", "email"]),
    );
    let mut registry = ChannelRegistry::new();
    for adapter in adapters {
        registry.register(adapter);
    }
    let dispatcher = BroadcastDispatcher::new(
        events.clone(),
        Arc::new(registry),
        RetryPolicy::with_attempts(3, Duration::from_millis(5), Duration::from_millis(20)),
        Duration::from_secs(60),
    );
    let gate = ModerationGate::new(
        events.clone(),
        Arc::new(StaticModeratorAuthorizer::allow_all()),
    );
    Harness {
        events,
        gate,
        dispatcher,
    }
}

pub fn draft(title: &str, channels: &[&str]) -> EventDraft {
    EventDraft {
        title: Some(title.to_string()),
        summary: Some(format!("{} summary", title)),
        body: Some(format!("{} body", title)),
        channels: channels.iter().map(|c| c.to_string()).collect(),
        created_by: Some(Uuid::new_v4()),
        ..Default::default()
    }
}

pub fn decision(decision: ModerationDecision) -> ModerationRequest {
    ModerationRequest {
        moderator_id: Uuid::new_v4(),
        decision,
        notes: None,
        expected_version: None,
    }
}

/// 起草、提交并审核通过，返回进入 broadcasting 的事件
pub async fn approved(h: &Harness, channels: &[&str]) -> Event {
    let event = h.events.create(draft("announcement", channels)).await.unwrap();
    h.events.submit(event.id, None, None).await.unwrap();
    h.gate
        .moderate(event.id, decision(ModerationDecision::Approve))
        .await
        .unwrap()
}

pub fn no_channels() -> BTreeSet<event_publishing::ChannelName> {
    BTreeSet::new()
}

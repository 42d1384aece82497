//! 进程内领域事件总线
//!
//! 每次存储变更成功后发布一条 [`DomainEvent`]，存储层不感知订阅者。
//! 广播 worker 订阅 `StatusChanged { to: Broadcasting }` 触发分发。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{ChannelName, EventStatus, ModerationDecision};

/// 变更类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEventKind {
    Created,
    ContentUpdated,
    StatusChanged {
        from: EventStatus,
        to: EventStatus,
    },
    Moderated {
        decision: ModerationDecision,
    },
    /// 投递记录变化（认领、单次尝试结果）
    DeliveryUpdated {
        channels: Vec<ChannelName>,
    },
}

/// 领域事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_id: Uuid,
    /// 变更后的版本
    pub version: i64,
    pub kind: DomainEventKind,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(event_id: Uuid, version: i64, kind: DomainEventKind) -> Self {
        Self {
            event_id,
            version,
            kind,
            occurred_at: Utc::now(),
        }
    }

    /// 是否为进入广播中的迁移
    pub fn entered_broadcasting(&self) -> bool {
        matches!(
            self.kind,
            DomainEventKind::StatusChanged {
                to: EventStatus::Broadcasting,
                ..
            }
        )
    }
}

const DEFAULT_CAPACITY: usize = 1024;

/// 基于 `tokio::sync::broadcast` 的扇出总线
///
/// 缓冲区满时最旧的消息被丢弃，慢订阅者收到 `RecvError::Lagged`
#[derive(Debug)]
pub struct DomainEventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl DomainEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 发布事件，没有订阅者时静默丢弃
    pub fn publish(&self, event: DomainEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for DomainEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = DomainEventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let id = Uuid::now_v7();
        bus.publish(DomainEvent::new(
            id,
            3,
            DomainEventKind::StatusChanged {
                from: EventStatus::Approved,
                to: EventStatus::Broadcasting,
            },
        ));

        let a = rx1.recv().await.unwrap();
        let b = rx2.recv().await.unwrap();
        assert_eq!(a, b);
        assert!(a.entered_broadcasting());
        assert_eq!(a.event_id, id);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = DomainEventBus::new(4);
        bus.publish(DomainEvent::new(Uuid::nil(), 1, DomainEventKind::Created));
    }

    #[test]
    fn test_kind_serializes_with_tag() {
        let json = serde_json::to_value(DomainEventKind::Moderated {
            decision: ModerationDecision::Reject,
        })
        .unwrap();
        assert_eq!(json["type"], "moderated");
        assert_eq!(json["decision"], "reject");
    }
}

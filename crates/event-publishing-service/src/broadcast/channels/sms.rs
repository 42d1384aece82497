//! 短信渠道（模拟）

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ChannelAdapter, ChannelConfig, ChannelError, ChannelMessage, ChannelReceipt};
use crate::models::{ChannelName, Event};

/// 单条短信最大字符数
const SMS_MAX_CHARS: usize = 70;

pub struct SmsChannel {
    config: ChannelConfig,
}

impl SmsChannel {
    pub const NAME: &'static str = "sms";

    pub fn new(config: ChannelConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChannelConfig::new(true).with_timeout(Duration::from_secs(3)))
    }

    /// 【标题】摘要，超长截断
    fn build_content(event: &Event) -> String {
        let message = ChannelMessage::from_event(event);
        let full = format!("【{}】{}", message.title, message.text);
        if full.chars().count() <= SMS_MAX_CHARS {
            full
        } else {
            let mut truncated: String = full.chars().take(SMS_MAX_CHARS - 3).collect();
            truncated.push_str("...");
            truncated
        }
    }
}

#[async_trait]
impl ChannelAdapter for SmsChannel {
    fn name(&self) -> ChannelName {
        ChannelName::new(Self::NAME)
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn send(&self, event: &Event) -> Result<ChannelReceipt, ChannelError> {
        if !self.config.enabled {
            warn!(event_id = %event.id, "SMS 渠道已禁用");
            return Err(ChannelError::Disabled(self.name()));
        }

        let content = Self::build_content(event);
        debug!(event_id = %event.id, content_length = content.chars().count(), "SMS 发送中...");

        let message_id = format!("sms_{}", Uuid::new_v4());
        info!(event_id = %event.id, message_id = %message_id, "SMS 发送成功");
        Ok(ChannelReceipt::with_message_id(message_id))
    }
}

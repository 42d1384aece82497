//! 全员邮件渠道
//!
//! 当前为模拟实现，只记录日志。接入真实邮件服务时替换 `deliver` 即可。

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ChannelAdapter, ChannelConfig, ChannelError, ChannelReceipt};
use crate::models::{ChannelName, Event};

const SUBJECT_PREFIX: &str = "[Staff Announcement]";

pub struct EmailChannel {
    config: ChannelConfig,
}

impl EmailChannel {
    pub const NAME: &'static str = "email";

    pub fn new(config: ChannelConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChannelConfig::new(true).with_timeout(Duration::from_secs(10)))
    }

    pub fn subject(event: &Event) -> String {
        format!("{} {}", SUBJECT_PREFIX, event.title)
    }

    fn build_html(event: &Event) -> String {
        format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="UTF-8"><title>{title}</title></head>
<body>
    <h2>{title}</h2>
    <p><strong>{summary}</strong></p>
    <div>{body}</div>
</body>
</html>"#,
            title = event.title,
            summary = event.summary,
            body = event.body,
        )
    }

    async fn deliver(&self, event: &Event) -> Result<String, ChannelError> {
        let html = Self::build_html(event);
        debug!(
            event_id = %event.id,
            subject = %Self::subject(event),
            content_length = html.len(),
            "Email 发送中..."
        );
        Ok(format!("email_{}", Uuid::new_v4()))
    }
}

#[async_trait]
impl ChannelAdapter for EmailChannel {
    fn name(&self) -> ChannelName {
        ChannelName::new(Self::NAME)
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn send(&self, event: &Event) -> Result<ChannelReceipt, ChannelError> {
        if !self.config.enabled {
            warn!(event_id = %event.id, "Email 渠道已禁用");
            return Err(ChannelError::Disabled(self.name()));
        }

        let message_id = self.deliver(event).await?;
        info!(event_id = %event.id, message_id = %message_id, "Email 发送成功");
        Ok(ChannelReceipt::with_message_id(message_id))
    }
}

//! Microsoft Teams 渠道
//!
//! 向 incoming webhook 发送 `{title, text}` 卡片；未配置 webhook 时为模拟发送。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    ChannelAdapter, ChannelConfig, ChannelError, ChannelMessage, ChannelReceipt,
    classify_request_error, classify_status,
};
use crate::models::{ChannelName, Event};

pub struct TeamsChannel {
    config: ChannelConfig,
    client: reqwest::Client,
}

impl TeamsChannel {
    pub const NAME: &'static str = "teams";

    pub fn new(config: ChannelConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChannelConfig::new(true), reqwest::Client::new())
    }

    fn build_card(event: &Event) -> serde_json::Value {
        let message = ChannelMessage::from_event(event);
        json!({
            "title": message.title,
            "text": message.text,
        })
    }
}

#[async_trait]
impl ChannelAdapter for TeamsChannel {
    fn name(&self) -> ChannelName {
        ChannelName::new(Self::NAME)
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn send(&self, event: &Event) -> Result<ChannelReceipt, ChannelError> {
        if !self.config.enabled {
            warn!(event_id = %event.id, "Teams 渠道已禁用");
            return Err(ChannelError::Disabled(self.name()));
        }

        let Some(webhook) = self.config.endpoint.as_deref() else {
            debug!(event_id = %event.id, "Teams 模拟发送");
            return Ok(ChannelReceipt::with_message_id(format!("teams_{}", Uuid::new_v4())));
        };

        let response = self
            .client
            .post(webhook)
            .json(&Self::build_card(event))
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        info!(event_id = %event.id, "Teams 消息发送成功");
        // webhook 不返回消息 ID
        Ok(ChannelReceipt::default())
    }
}

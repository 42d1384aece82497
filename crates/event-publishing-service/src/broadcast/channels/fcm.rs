//! FCM 推送渠道
//!
//! 按主题 `events` 向订阅设备推送标题和摘要。配置了 endpoint 时通过 HTTP
//! 调用推送网关，否则为模拟发送。

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

/// 推送主题
const FCM_TOPIC: &str = "events";

pub struct FcmChannel {
    config: ChannelConfig,
    client: reqwest::Client,
}

impl FcmChannel {
    pub const NAME: &'static str = "fcm";

    pub fn new(config: ChannelConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// 模拟模式，用于本地开发
    pub fn with_defaults() -> Self {
        Self::new(ChannelConfig::new(true), reqwest::Client::new())
    }

    fn build_payload(event: &Event) -> serde_json::Value {
        let message = ChannelMessage::from_event(event);
        json!({
            "message": {
                "topic": FCM_TOPIC,
                "notification": {
                    "title": message.title,
                    "body": message.text,
                },
                "data": {
                    "event_id": event.id.to_string(),
                },
            }
        })
    }

    async fn post(&self, endpoint: &str, event: &Event) -> Result<ChannelReceipt, ChannelError> {
        let mut request = self.client.post(endpoint).json(&Self::build_payload(event));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(classify_request_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        // 网关返回 {"name": "projects/.../messages/..."}
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let message_id = body
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Ok(ChannelReceipt { message_id })
    }
}

#[async_trait]
impl ChannelAdapter for FcmChannel {
    fn name(&self) -> ChannelName {
        ChannelName::new(Self::NAME)
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn send(&self, event: &Event) -> Result<ChannelReceipt, ChannelError> {
        if !self.config.enabled {
            warn!(event_id = %event.id, "FCM 渠道已禁用");
            return Err(ChannelError::Disabled(self.name()));
        }

        let receipt = match self.config.endpoint.as_deref() {
            Some(endpoint) => {
                debug!(event_id = %event.id, endpoint = %endpoint, "FCM 推送中...");
                self.post(endpoint, event).await?
            }
            None => {
                debug!(event_id = %event.id, topic = FCM_TOPIC, "FCM 模拟推送");
                ChannelReceipt::with_message_id(format!("fcm_{}", Uuid::new_v4()))
            }
        };

        info!(
            event_id = %event.id,
            message_id = ?receipt.message_id,
            "FCM 推送成功"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::normalize_channels;
    use chrono::Utc;

    fn event() -> Event {
        let mut event = Event::new_draft(
            "Office closed".to_string(),
            Uuid::new_v4(),
            normalize_channels(["fcm"]),
            Utc::now(),
        );
        event.summary = "Friday only".to_string();
        event
    }

    #[test]
    fn test_payload_targets_events_topic() {
        let event = event();
        let payload = FcmChannel::build_payload(&event);
        assert_eq!(payload["message"]["topic"], "events");
        assert_eq!(payload["message"]["notification"]["title"], "Office closed");
        assert_eq!(payload["message"]["notification"]["body"], "Friday only");
        assert_eq!(payload["message"]["data"]["event_id"], event.id.to_string());
    }

    #[tokio::test]
    async fn test_simulated_send() {
        let channel = FcmChannel::with_defaults();
        let receipt = channel.send(&event()).await.unwrap();
        assert!(receipt.message_id.unwrap().starts_with("fcm_"));
    }

    #[tokio::test]
    async fn test_disabled_channel() {
        let channel = FcmChannel::new(ChannelConfig::new(false), reqwest::Client::new());
        let err = channel.send(&event()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Disabled(_)));
        assert!(!err.is_retryable());
    }
}

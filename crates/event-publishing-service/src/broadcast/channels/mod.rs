//! 广播渠道实现
//!
//! 定义渠道适配器 trait 并提供内置渠道。
//!
//! ## 内置渠道
//!
//! - **fcm**: 推送通知，配置 endpoint 时走 HTTP，否则模拟
//! - **email**: 全员邮件（模拟）
//! - **sms**: 短信（模拟）
//! - **teams**: Teams incoming webhook，配置 endpoint 时走 HTTP，否则模拟

mod email;
mod fcm;
mod sms;
mod teams;

pub use email::EmailChannel;
pub use fcm::FcmChannel;
pub use sms::SmsChannel;
pub use teams::TeamsChannel;

use std::time::Duration;

use async_trait::async_trait;
use broadcast_shared::config::ChannelSettings;
use thiserror::Error;

use crate::models::{ChannelName, Event};

/// 渠道投递错误
///
/// 只体现在投递记录中，不会向 API 调用方返回
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("渠道暂时不可用: {0}")]
    Transient(String),

    #[error("渠道投递失败: {0}")]
    Permanent(String),

    #[error("渠道发送超时: {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("不支持的渠道: {0}")]
    Unsupported(ChannelName),

    #[error("渠道已禁用: {0}")]
    Disabled(ChannelName),
}

impl ChannelError {
    /// 超时与瞬时错误可重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }

    /// 指标标签
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::Permanent(_) => "permanent",
            Self::Timeout(_) => "timeout",
            Self::Unsupported(_) => "unsupported",
            Self::Disabled(_) => "disabled",
        }
    }
}

/// 渠道回执
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelReceipt {
    /// 渠道侧消息 ID
    pub message_id: Option<String>,
}

impl ChannelReceipt {
    pub fn with_message_id(message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
        }
    }
}

/// 渠道适配器 trait
///
/// 实现应当无状态，便于同一事件的多个渠道并发调用。
/// 超时由分发器按 [`ChannelAdapter::timeout`] 统一包裹。
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn name(&self) -> ChannelName;

    fn timeout(&self) -> Duration;

    async fn send(&self, event: &Event) -> Result<ChannelReceipt, ChannelError>;
}

/// 各渠道共用的消息内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub title: String,
    /// 摘要为空时取正文前若干字符
    pub text: String,
}

const PREVIEW_CHARS: usize = 140;

impl ChannelMessage {
    pub fn from_event(event: &Event) -> Self {
        let text = if event.summary.trim().is_empty() {
            event.body.chars().take(PREVIEW_CHARS).collect()
        } else {
            event.summary.clone()
        };
        Self {
            title: event.title.clone(),
            text,
        }
    }
}

/// 渠道运行参数
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub timeout: Duration,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

impl ChannelConfig {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            timeout: Duration::from_millis(5000),
            endpoint: None,
            api_key: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl From<&ChannelSettings> for ChannelConfig {
    fn from(settings: &ChannelSettings) -> Self {
        Self {
            enabled: settings.enabled,
            timeout: Duration::from_millis(settings.timeout_ms),
            endpoint: settings.endpoint.clone().filter(|e| !e.trim().is_empty()),
            api_key: settings.api_key.clone().filter(|k| !k.trim().is_empty()),
        }
    }
}

/// 把 HTTP 响应状态映射为渠道错误
///
/// 408/429/5xx 视为瞬时错误，其余 4xx 视为永久错误
pub(crate) fn classify_status(status: reqwest::StatusCode, body: &str) -> ChannelError {
    let detail = format!("HTTP {}: {}", status.as_u16(), body.chars().take(200).collect::<String>());
    if status.is_server_error()
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
    {
        ChannelError::Transient(detail)
    } else {
        ChannelError::Permanent(detail)
    }
}

/// 请求构造失败为永久错误，其余（连接、超时、读取）为瞬时错误
pub(crate) fn classify_request_error(err: reqwest::Error) -> ChannelError {
    if err.is_builder() {
        ChannelError::Permanent(err.to_string())
    } else {
        ChannelError::Transient(err.to_string())
    }
}

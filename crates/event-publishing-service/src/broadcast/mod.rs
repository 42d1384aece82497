//! 广播模块
//!
//! 把已审核通过的事件投递到各个渠道。
//!
//! ## 功能特性
//!
//! - **渠道幂等**：`(event_id, channel)` 成功后不再重复发送
//! - **并发安全**：发送前以 CAS 认领渠道，多个分发者并发时每个渠道只发送一次
//! - **部分失败容忍**：单渠道失败不影响其他渠道，失败渠道按指数退避重试
//! - **异步受理**：API 受理后立即返回，后台 worker 执行分发

pub mod channels;
pub mod dispatcher;
pub mod registry;
pub mod worker;

pub use channels::{
    ChannelAdapter, ChannelConfig, ChannelError, ChannelMessage, ChannelReceipt, EmailChannel,
    FcmChannel, SmsChannel, TeamsChannel,
};
pub use dispatcher::{BroadcastDispatcher, DispatchReport};
pub use registry::ChannelRegistry;
pub use worker::{Admission, BroadcastJob, BroadcastService, BroadcastWorker, broadcast_pipeline};

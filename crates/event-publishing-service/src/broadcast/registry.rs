//! 渠道注册表
//!
//! 渠道名到适配器的映射。新增渠道只需注册新的适配器。

use std::collections::HashMap;
use std::sync::Arc;

use broadcast_shared::config::ChannelsConfig;
use tracing::info;

use super::channels::{
    ChannelAdapter, ChannelConfig, EmailChannel, FcmChannel, SmsChannel, TeamsChannel,
};
use crate::models::ChannelName;

#[derive(Clone, Default)]
pub struct ChannelRegistry {
    adapters: HashMap<ChannelName, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按适配器自报的名称注册，同名覆盖
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) -> &mut Self {
        self.adapters.insert(adapter.name(), adapter);
        self
    }

    pub fn get(&self, name: &ChannelName) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn contains(&self, name: &ChannelName) -> bool {
        self.adapters.contains_key(name)
    }

    pub fn names(&self) -> Vec<ChannelName> {
        let mut names: Vec<_> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }

    /// 注册全部内置渠道
    pub fn from_config(config: &ChannelsConfig, client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry
            .register(Arc::new(FcmChannel::new(
                ChannelConfig::from(&config.fcm),
                client.clone(),
            )))
            .register(Arc::new(EmailChannel::new(ChannelConfig::from(&config.email))))
            .register(Arc::new(SmsChannel::new(ChannelConfig::from(&config.sms))))
            .register(Arc::new(TeamsChannel::new(
                ChannelConfig::from(&config.teams),
                client,
            )));

        info!(channels = ?registry.names(), "渠道注册完成");
        registry
    }
}

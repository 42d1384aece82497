//! 审核权限判定
//!
//! 外部授权系统通过 [`ModeratorAuthorizer`] 接入；默认实现按配置白名单判定。

use std::collections::HashSet;

use async_trait::async_trait;
use broadcast_shared::config::ModerationConfig;
use tracing::info;
use uuid::Uuid;

use crate::error::{EventError, Result};

/// 审核权限接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModeratorAuthorizer: Send + Sync {
    /// 该用户是否具备审核权限
    async fn can_moderate(&self, moderator_id: Uuid) -> bool;
}

/// 基于配置的静态授权
#[derive(Debug, Clone, Default)]
pub struct StaticModeratorAuthorizer {
    allow_any: bool,
    moderators: HashSet<Uuid>,
}

impl StaticModeratorAuthorizer {
    pub fn new(allow_any: bool, moderators: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            allow_any,
            moderators: moderators.into_iter().collect(),
        }
    }

    /// 放行所有人
    pub fn allow_all() -> Self {
        Self::new(true, [])
    }

    pub fn from_config(config: &ModerationConfig) -> Result<Self> {
        let moderators = config
            .moderators
            .iter()
            .map(|raw| {
                Uuid::parse_str(raw.trim())
                    .map_err(|_| EventError::Validation(format!("无效的审核员 ID: {}", raw)))
            })
            .collect::<Result<HashSet<_>>>()?;

        info!(
            allow_any = config.allow_any,
            moderator_count = moderators.len(),
            "审核授权已加载"
        );

        Ok(Self {
            allow_any: config.allow_any,
            moderators,
        })
    }
}

#[async_trait]
impl ModeratorAuthorizer for StaticModeratorAuthorizer {
    async fn can_moderate(&self, moderator_id: Uuid) -> bool {
        if moderator_id.is_nil() {
            return false;
        }
        self.allow_any || self.moderators.contains(&moderator_id)
    }
}

//! 事件服务枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 事件状态
///
/// 状态迁移只允许沿 [`EventStatus::can_transition_to`] 定义的边进行
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum EventStatus {
    /// 草稿 - 作者编辑中
    #[default]
    Draft,
    /// 待审核
    PendingReview,
    /// 审核通过，等待进入定时或广播
    Approved,
    /// 审核驳回
    Rejected,
    /// 已排期，等待 scheduled_at 到达
    Scheduled,
    /// 广播中
    Broadcasting,
    /// 广播完成，所有渠道成功
    Broadcasted,
    /// 广播结束，至少一个渠道最终失败
    Failed,
}

impl EventStatus {
    pub const ALL: [EventStatus; 8] = [
        Self::Draft,
        Self::PendingReview,
        Self::Approved,
        Self::Rejected,
        Self::Scheduled,
        Self::Broadcasting,
        Self::Broadcasted,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Scheduled => "scheduled",
            Self::Broadcasting => "broadcasting",
            Self::Broadcasted => "broadcasted",
            Self::Failed => "failed",
        }
    }

    /// 状态机的全部合法边
    ///
    /// `failed/broadcasted -> broadcasting` 仅供重新广播的准入流程使用，
    /// `rejected/failed -> draft` 仅供 reopen 使用。
    pub fn can_transition_to(&self, target: EventStatus) -> bool {
        use EventStatus::*;
        matches!(
            (self, target),
            (Draft, PendingReview)
                | (PendingReview, Approved)
                | (PendingReview, Rejected)
                | (Approved, Scheduled)
                | (Approved, Broadcasting)
                | (Scheduled, Broadcasting)
                | (Broadcasting, Broadcasted)
                | (Broadcasting, Failed)
                | (Rejected, Draft)
                | (Failed, Draft)
                | (Failed, Broadcasting)
                | (Broadcasted, Broadcasting)
        )
    }

    /// 作者可编辑内容的状态
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::PendingReview)
    }

    /// 已结束一轮广播的状态
    pub fn is_broadcast_finished(&self) -> bool {
        matches!(self, Self::Broadcasted | Self::Failed)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("未知的事件状态: {}", s))
    }
}

/// 审核决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationDecision {
    #[serde(alias = "approved")]
    Approve,
    #[serde(alias = "rejected")]
    Reject,
}

impl ModerationDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for ModerationDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个渠道的投递状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// 已被某个分发者认领，发送中
    #[default]
    InFlight,
    Succeeded,
    /// 终态失败（重试用尽或不可重试）
    Failed,
}

/// 审计动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    Submitted,
    StatusChanged,
    Moderated,
    Reopened,
    BroadcastRequested,
    ChannelDelivered,
    ChannelFailed,
    BroadcastCompleted,
}

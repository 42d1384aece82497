//! 事件服务错误类型
//!
//! 定义服务层的业务错误和系统错误

use thiserror::Error;
use uuid::Uuid;

use crate::models::EventStatus;

/// 事件服务错误类型
#[derive(Debug, Error)]
pub enum EventError {
    // === 业务错误 ===
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("事件不存在: {0}")]
    NotFound(Uuid),

    #[error("版本冲突: event_id={id}, expected={expected}, actual={actual}")]
    Conflict { id: Uuid, expected: i64, actual: i64 },

    #[error("本轮审核已完成，不能重复审核: event_id={0}")]
    AlreadyModerated(Uuid),

    #[error("当前状态不允许此操作: event_id={id}, status={status}, operation={operation}")]
    InvalidState {
        id: Uuid,
        status: EventStatus,
        operation: &'static str,
    },

    #[error("非法状态迁移: {from} -> {to}")]
    IllegalTransition { from: EventStatus, to: EventStatus },

    #[error("无审核权限: moderator_id={0}")]
    Forbidden(Uuid),

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EventError>;

impl EventError {
    /// 稳定的错误码，对外暴露
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "EVENT_NOT_FOUND",
            Self::Conflict { .. } | Self::AlreadyModerated(_) => "CONFLICT",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Database(_) | Self::Serialization(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 版本冲突重读后可重试；数据库瞬时故障可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Database(e) => matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)),
            _ => false,
        }
    }

    /// 调度器或并发分发竞争失败，可静默忽略
    pub fn is_race_lost(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::IllegalTransition { .. } | Self::InvalidState { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let id = Uuid::nil();
        assert_eq!(EventError::NotFound(id).error_code(), "EVENT_NOT_FOUND");
        assert_eq!(EventError::AlreadyModerated(id).error_code(), "CONFLICT");
        assert_eq!(
            EventError::IllegalTransition {
                from: EventStatus::Draft,
                to: EventStatus::Broadcasted,
            }
            .error_code(),
            "ILLEGAL_TRANSITION"
        );
        assert_eq!(
            EventError::Database(sqlx::Error::RowNotFound).error_code(),
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn test_conflict_is_retryable() {
        let err = EventError::Conflict {
            id: Uuid::nil(),
            expected: 1,
            actual: 2,
        };
        assert!(err.is_retryable());
        assert!(err.is_race_lost());
        assert!(!EventError::Forbidden(Uuid::nil()).is_retryable());
    }
}

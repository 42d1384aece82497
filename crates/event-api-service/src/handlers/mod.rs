//! HTTP 请求处理器

pub mod broadcast;
pub mod event;
pub mod health;
pub mod moderation;
pub mod tag;

//! 业务服务层

mod event_service;

pub use event_service::{EventService, TAG_SEARCH_LIMIT};
pub(crate) use event_service::{ensure_version, transitioned};

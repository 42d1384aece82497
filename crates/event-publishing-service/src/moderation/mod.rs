//! 审核模块

mod authorizer;
mod gate;

pub use authorizer::{ModeratorAuthorizer, StaticModeratorAuthorizer};
pub use gate::{ModerationGate, ModerationRequest};

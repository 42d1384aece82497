//! 领域模型

mod enums;
mod event;

pub use enums::*;
pub use event::*;

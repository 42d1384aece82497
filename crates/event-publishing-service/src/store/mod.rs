//! 事件存储层

mod memory;
mod postgres;
mod traits;

pub use memory::MemoryEventStore;
pub use postgres::PgEventStore;
pub use traits::EventStore;

#[cfg(test)]
pub use traits::MockEventStore;

//! Session-scoped messaging: wire types, rate limiting, and the bus.

mod bus;
mod message;
mod rate_limit;

pub use bus::{BusStats, BusSubscriber, MessageBus};
pub use message::{Message, MessageExtension, MessageMetadata, MessageType, SendMessage};
pub use rate_limit::SlidingWindowLimiter;

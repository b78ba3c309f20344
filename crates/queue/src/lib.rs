//! Durable notification queue: the broker contract, its Redis implementation
//! and an in-process broker for tests and local runs.

pub mod broker;
pub mod memory;
pub mod redis_queue;

pub use broker::{Consumer, Delivery, Envelope, Publisher, QueueError, publish_json};
pub use memory::InMemoryBroker;
pub use redis_queue::{RedisConsumer, RedisQueue};

//! Broker adapters.
//!
//! The in-memory broker lives in `liftride-queue`; the Redis Streams adapter is
//! behind the `redis` feature.

pub use liftride_queue::{InMemoryBroker, InMemoryChannel};

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisChannel, RedisStreamsBroker};

//! Event bus transports.
//!
//! The in-process bus lives in `flowra-events`; this module adds the
//! cross-process transport.

#[cfg(feature = "redis")]
pub mod redis_pubsub;

#[cfg(feature = "redis")]
pub use redis_pubsub::RedisEventBus;

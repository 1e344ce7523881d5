//! Cooldown store adapters.
//!
//! A cooldown marker is a key with a TTL that is written once per accepted
//! dispatch and never deleted; its expiry is what reopens the window.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryCooldownStore;
pub use self::redis::{connect as connect_redis, RedisCooldownStore};

//! Redis-backed cooldown markers.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::dispatch::CooldownStore;

/// Cooldown store on a shared Redis instance.
///
/// `SET key value NX PX ttl` is a single command, so two coordinators racing
/// on the same key can never both see `OK`.
#[derive(Clone)]
pub struct RedisCooldownStore {
    conn: ConnectionManager,
}

impl RedisCooldownStore {
    /// Wrap an existing connection manager (shared with the Redis queues).
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

/// Open a managed connection and make sure the server answers.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

    let mut conn = ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;

    let pong: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .context("Redis PING failed")?;

    info!(reply = %pong, "redis_connected");

    Ok(conn)
}

/// Decode a `PTTL` reply: `-2` missing key, `-1` no expiry.
fn decode_pttl(millis: i64) -> Option<Duration> {
    if millis > 0 {
        Some(Duration::from_millis(millis as u64))
    } else {
        None
    }
}

/// TTL in whole milliseconds, never below 1 so `PX` accepts it.
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl CooldownStore for RedisCooldownStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();

        // Nil reply means the key already existed.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .with_context(|| format!("SET NX failed for {}", key))?;

        Ok(reply.is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();

        let millis: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("PTTL failed for {}", key))?;

        Ok(decode_pttl(millis))
    }
}

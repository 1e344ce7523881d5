//! Redis list queues, appended with `RPUSH` and consumed by the workers with
//! `BLPOP`/`LPOP`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;

use crate::dispatch::WorkQueue;

/// One named Redis list.
#[derive(Clone)]
pub struct RedisListQueue {
    name: String,
    conn: ConnectionManager,
}

impl RedisListQueue {
    pub fn new(name: impl Into<String>, conn: ConnectionManager) -> Self {
        Self {
            name: name.into(),
            conn,
        }
    }
}

#[async_trait]
impl WorkQueue for RedisListQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn append(&self, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();

        let length: i64 = redis::cmd("RPUSH")
            .arg(&self.name)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("RPUSH to {} failed", self.name))?;

        debug!(queue = %self.name, queue_length = length, "redis_queue_appended");

        Ok(())
    }
}

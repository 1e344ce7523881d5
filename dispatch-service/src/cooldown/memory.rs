//! Process-local cooldown store.
//!
//! Only coordinates callers inside one process; the dispatch tests run
//! against it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::time::Instant;

use crate::dispatch::CooldownStore;

/// Cooldown markers kept in a map of expiry deadlines.
///
/// Uses `tokio::time::Instant` so paused-clock tests can step through a
/// cooldown window.
#[derive(Debug, Default)]
pub struct MemoryCooldownStore {
    deadlines: Mutex<HashMap<String, Instant>>,
}

impl MemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CooldownStore for MemoryCooldownStore {
    async fn set_if_absent(&self, key: &str, _value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut deadlines = self
            .deadlines
            .lock()
            .map_err(|_| anyhow!("cooldown map poisoned"))?;

        // Only live markers stay in the map.
        deadlines.retain(|_, deadline| *deadline > now);

        if deadlines.contains_key(key) {
            return Ok(false);
        }
        deadlines.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        let deadlines = self
            .deadlines
            .lock()
            .map_err(|_| anyhow!("cooldown map poisoned"))?;

        Ok(deadlines
            .get(key)
            .filter(|deadline| **deadline > now)
            .map(|deadline| *deadline - now))
    }
}

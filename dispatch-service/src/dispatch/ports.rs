//! Collaborators the coordinator talks to.
//!
//! Production adapters live in `cooldown`, `storage`, `catalog` and `queue`;
//! tests substitute in-memory versions.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::types::ResourceId;
use crate::storage::FetchError;

/// Shared key-value store holding cooldown markers.
///
/// There is no delete: a marker only disappears by expiring.
#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// Atomically create `key` with `ttl` unless it already exists.
    ///
    /// Returns `true` when this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Remaining time to live, `None` when the key is absent or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;
}

/// Binary blob retrieval by storage path.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError>;
}

/// Lookup of the storage path recorded for an image.
#[async_trait]
pub trait ResourceLocator: Send + Sync {
    /// `Ok(None)` when no such image exists.
    async fn storage_path(&self, id: &ResourceId) -> Result<Option<String>>;
}

/// One named, durable, ordered queue consumed by a model worker pool.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn append(&self, payload: &[u8]) -> Result<()>;
}

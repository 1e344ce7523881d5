//! Cooldown-gated fan-out of prediction requests.
//!
//! ```text
//! request_dispatch(id)
//!   ├─ PTTL key        > 0 → RateLimited
//!   ├─ SET key NX PX   lost → PTTL → RateLimited
//!   ├─ locate + fetch  fail → ResourceFetchFailed   (cooldown kept)
//!   ├─ base64 + JSON   once
//!   └─ append to every queue in order
//!                      any fail → PartialDispatchFailure (cooldown kept)
//! ```
//!
//! The only cross-instance coordination is the cooldown store's atomic
//! set-if-absent. Nothing here ever removes a marker.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::error::{DispatchError, QueueFailure};
use super::ports::{CooldownStore, ObjectStore, ResourceLocator, WorkQueue};
use super::types::{DispatchAck, DispatchPayload, ResourceId};
use crate::storage::FetchError;

/// Marker value written under the cooldown key.
const COOLDOWN_MARKER: &str = "1";

/// Shortest retry hint ever returned; covers a marker expiring between the
/// failed set and the TTL re-read.
const MIN_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Tunables for a [`DispatchCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub cooldown: Duration,
    pub lock_key_prefix: String,
    pub io_timeout: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(300),
            lock_key_prefix: "predict-lock:".to_string(),
            io_timeout: Duration::from_secs(10),
        }
    }
}

/// Gates and fans out prediction requests.
///
/// Cheap to share behind an `Arc`; holds no mutable state of its own.
pub struct DispatchCoordinator {
    cooldowns: Arc<dyn CooldownStore>,
    locator: Arc<dyn ResourceLocator>,
    objects: Arc<dyn ObjectStore>,
    queues: Vec<Arc<dyn WorkQueue>>,
    settings: CoordinatorSettings,
}

impl DispatchCoordinator {
    /// `queues` are published to in the order given.
    pub fn new(
        cooldowns: Arc<dyn CooldownStore>,
        locator: Arc<dyn ResourceLocator>,
        objects: Arc<dyn ObjectStore>,
        queues: Vec<Arc<dyn WorkQueue>>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            cooldowns,
            locator,
            objects,
            queues,
            settings,
        }
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|q| q.name().to_string()).collect()
    }

    pub fn locator(&self) -> &Arc<dyn ResourceLocator> {
        &self.locator
    }

    /// Storage path of `id`, looked up under the I/O deadline.
    pub async fn locate(&self, id: &ResourceId) -> anyhow::Result<Option<String>> {
        self.with_timeout(self.locator.storage_path(id)).await
    }

    /// Cooldown key for an image.
    pub fn lock_key(&self, id: &ResourceId) -> String {
        format!("{}{}", self.settings.lock_key_prefix, id)
    }

    /// Dispatch `id` to every queue unless it was dispatched within the
    /// cooldown window.
    ///
    /// Once the cooldown is acquired it is never released early, whatever
    /// happens afterwards (fetch failure, partial publish, cancellation).
    pub async fn request_dispatch(&self, id: &ResourceId) -> Result<DispatchAck, DispatchError> {
        let key = self.lock_key(id);

        // Fast reject. A failed read is not fatal: the atomic set decides.
        match self.with_timeout(self.cooldowns.ttl(&key)).await {
            Ok(Some(remaining)) if !remaining.is_zero() => {
                info!(
                    resource_id = %id,
                    retry_after_ms = remaining.as_millis() as u64,
                    "dispatch_rate_limited"
                );
                return Err(DispatchError::RateLimited {
                    retry_after: remaining,
                });
            }
            Ok(_) => {}
            Err(e) => warn!(resource_id = %id, error = %e, "dispatch_ttl_read_failed"),
        }

        let acquired = self
            .with_timeout(self.cooldowns.set_if_absent(
                &key,
                COOLDOWN_MARKER,
                self.settings.cooldown,
            ))
            .await
            .map_err(|e| {
                error!(resource_id = %id, error = %e, "dispatch_cooldown_store_failed");
                DispatchError::CooldownUnavailable(e)
            })?;

        if !acquired {
            let retry_after = self.remaining_after_lost_race(&key).await;
            info!(
                resource_id = %id,
                retry_after_ms = retry_after.as_millis() as u64,
                "dispatch_rate_limited_race"
            );
            return Err(DispatchError::RateLimited { retry_after });
        }

        info!(
            resource_id = %id,
            cooldown_secs = self.settings.cooldown.as_secs(),
            "dispatch_cooldown_acquired"
        );

        let image = self.fetch_image(id).await.map_err(|source| {
            error!(resource_id = %id, error = %source, "dispatch_fetch_failed");
            DispatchError::ResourceFetchFailed {
                resource_id: id.clone(),
                source,
            }
        })?;

        let body = DispatchPayload::new(id, &image).to_bytes()?;

        self.publish(id, &body).await
    }

    async fn remaining_after_lost_race(&self, key: &str) -> Duration {
        match self.with_timeout(self.cooldowns.ttl(key)).await {
            Ok(Some(remaining)) => remaining.max(MIN_RETRY_AFTER),
            Ok(None) => MIN_RETRY_AFTER,
            Err(e) => {
                warn!(key = %key, error = %e, "dispatch_ttl_reread_failed");
                self.settings.cooldown
            }
        }
    }

    async fn fetch_image(&self, id: &ResourceId) -> Result<Vec<u8>, FetchError> {
        let path = self
            .locate(id)
            .await
            .map_err(FetchError::Transient)?
            .ok_or_else(|| FetchError::NotFound(format!("no storage path for image {}", id)))?;

        let image = match timeout(self.settings.io_timeout, self.objects.fetch(&path)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FetchError::Transient(anyhow!(
                    "fetch of {} timed out after {:?}",
                    path,
                    self.settings.io_timeout
                )))
            }
        };

        info!(
            resource_id = %id,
            path = %path,
            image_bytes = image.len(),
            "dispatch_image_fetched"
        );

        Ok(image)
    }

    /// Append `body` to each queue in order. No rollback on failure.
    async fn publish(&self, id: &ResourceId, body: &[u8]) -> Result<DispatchAck, DispatchError> {
        let mut published = Vec::with_capacity(self.queues.len());
        let mut failed = Vec::new();

        for queue in &self.queues {
            match self.with_timeout(queue.append(body)).await {
                Ok(()) => {
                    info!(
                        resource_id = %id,
                        queue = queue.name(),
                        body_length = body.len(),
                        "dispatch_published"
                    );
                    published.push(queue.name().to_string());
                }
                Err(e) => {
                    error!(
                        resource_id = %id,
                        queue = queue.name(),
                        error = %e,
                        "dispatch_publish_failed"
                    );
                    failed.push(QueueFailure {
                        queue: queue.name().to_string(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        if !failed.is_empty() {
            warn!(
                resource_id = %id,
                published = published.len(),
                failed = failed.len(),
                "dispatch_partial_failure"
            );
            return Err(DispatchError::PartialDispatchFailure {
                resource_id: id.clone(),
                published,
                failed,
            });
        }

        Ok(DispatchAck {
            resource_id: id.clone(),
            queues: published,
        })
    }

    /// Run a fallible round trip under the configured I/O deadline.
    async fn with_timeout<T, F>(&self, fut: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match timeout(self.settings.io_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("timed out after {:?}", self.settings.io_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    use super::*;
    use crate::dispatch::testing::{Harness, RecordingQueue, IMAGE};

    fn harness() -> Harness {
        Harness::new("abc", true)
    }

    fn harness_with(queues: Vec<Arc<RecordingQueue>>, stored: bool) -> Harness {
        Harness::with_queues("abc", queues, stored)
    }

    fn abc() -> ResourceId {
        ResourceId::new("abc").unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_publishes_same_payload_to_all_queues() {
        let h = harness();

        let ack = h.coordinator.request_dispatch(&abc()).await.unwrap();

        assert_eq!(ack.resource_id, abc());
        assert_eq!(ack.queues, vec!["A", "B", "C"]);

        let first = h.queues[0].items();
        assert_eq!(first.len(), 1);
        for queue in &h.queues {
            assert_eq!(queue.items(), first);
        }

        let payload: DispatchPayload = serde_json::from_slice(&first[0]).unwrap();
        assert_eq!(payload.id, "abc");
        assert_eq!(STANDARD.decode(payload.image_base64).unwrap(), IMAGE);
    }

    #[tokio::test]
    async fn test_lock_key_uses_prefix() {
        let h = harness();
        assert_eq!(h.coordinator.lock_key(&abc()), "predict-lock:abc");
    }

    #[tokio::test]
    async fn test_second_call_within_cooldown_is_rate_limited() {
        let h = harness();

        h.coordinator.request_dispatch(&abc()).await.unwrap();
        let err = h.coordinator.request_dispatch(&abc()).await.unwrap_err();

        match err {
            DispatchError::RateLimited { retry_after } => assert!(retry_after > Duration::ZERO),
            other => panic!("expected RateLimited, got {:?}", other),
        }
        // The rejected call fetched and published nothing.
        assert_eq!(h.objects.fetch_count(), 1);
        assert_eq!(h.queues[0].items().len(), 1);
    }

    #[tokio::test]
    async fn test_other_resources_are_independent() {
        let h = harness();

        h.coordinator.request_dispatch(&abc()).await.unwrap();
        let err = h
            .coordinator
            .request_dispatch(&ResourceId::new("xyz").unwrap())
            .await
            .unwrap_err();

        // xyz is not rate limited; it simply has no stored image.
        assert!(matches!(err, DispatchError::ResourceFetchFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_window_scenario() {
        let h = harness();

        // t = 0
        h.coordinator.request_dispatch(&abc()).await.unwrap();

        // t = 10
        tokio::time::advance(Duration::from_secs(10)).await;
        let err = h.coordinator.request_dispatch(&abc()).await.unwrap_err();
        assert_eq!(err.retry_after_secs(), Some(290));

        // t = 301
        tokio::time::advance(Duration::from_secs(291)).await;
        let ack = h.coordinator.request_dispatch(&abc()).await.unwrap();
        assert_eq!(ack.queues, vec!["A", "B", "C"]);

        assert_eq!(h.objects.fetch_count(), 2);
        for queue in &h.queues {
            assert_eq!(queue.items().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_cooldown_and_publishes_nothing() {
        let h = harness_with(
            vec![
                RecordingQueue::new("A"),
                RecordingQueue::new("B"),
                RecordingQueue::new("C"),
            ],
            false,
        );

        let err = h.coordinator.request_dispatch(&abc()).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::ResourceFetchFailed {
                source: FetchError::NotFound(_),
                ..
            }
        ));

        for queue in &h.queues {
            assert!(queue.items().is_empty());
        }

        let remaining = h.cooldowns.ttl("predict-lock:abc").await.unwrap();
        assert!(remaining.is_some_and(|ttl| !ttl.is_zero()));

        let retry = h.coordinator.request_dispatch(&abc()).await.unwrap_err();
        assert!(retry.is_rate_limited());
    }

    #[tokio::test]
    async fn test_one_failed_queue_reports_partial_failure() {
        let h = harness_with(
            vec![
                RecordingQueue::new("A"),
                RecordingQueue::failing("B"),
                RecordingQueue::new("C"),
            ],
            true,
        );

        let err = h.coordinator.request_dispatch(&abc()).await.unwrap_err();
        match err {
            DispatchError::PartialDispatchFailure {
                resource_id,
                published,
                failed,
            } => {
                assert_eq!(resource_id, abc());
                assert_eq!(published, vec!["A", "C"]);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].queue, "B");
                assert!(failed[0].reason.contains("connection reset"));
            }
            other => panic!("expected PartialDispatchFailure, got {:?}", other),
        }

        assert_eq!(h.queues[0].items().len(), 1);
        assert!(h.queues[1].items().is_empty());
        assert_eq!(h.queues[2].items(), h.queues[0].items());

        let remaining = h.cooldowns.ttl("predict-lock:abc").await.unwrap();
        assert!(remaining.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_requests_admit_exactly_one() {
        let h = harness();

        let calls = (0..50).map(|_| {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.request_dispatch(&abc()).await })
        });
        let results = futures::future::join_all(calls).await;

        let mut ok = 0;
        let mut limited = 0;
        for result in results {
            match result.unwrap() {
                Ok(_) => ok += 1,
                Err(DispatchError::RateLimited { retry_after }) => {
                    assert!(retry_after > Duration::ZERO);
                    limited += 1;
                }
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(limited, 49);
        assert_eq!(h.objects.fetch_count(), 1);
        for queue in &h.queues {
            assert_eq!(queue.items().len(), 1);
        }
    }

    struct LosingRaceStore;

    #[async_trait]
    impl CooldownStore for LosingRaceStore {
        async fn set_if_absent(&self, _: &str, _: &str, _: Duration) -> anyhow::Result<bool> {
            Ok(false)
        }

        async fn ttl(&self, _: &str) -> anyhow::Result<Option<Duration>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_lost_race_is_rate_limited_even_without_ttl() {
        let h = harness();
        let coordinator = DispatchCoordinator::new(
            Arc::new(LosingRaceStore),
            h.coordinator.locator().clone(),
            h.objects.clone(),
            vec![h.queues[0].clone() as Arc<dyn WorkQueue>],
            CoordinatorSettings::default(),
        );

        let err = coordinator.request_dispatch(&abc()).await.unwrap_err();
        match err {
            DispatchError::RateLimited { retry_after } => assert_eq!(retry_after, MIN_RETRY_AFTER),
            other => panic!("expected RateLimited, got {:?}", other),
        }
        assert_eq!(h.objects.fetch_count(), 0);
    }

    struct BrokenStore;

    #[async_trait]
    impl CooldownStore for BrokenStore {
        async fn set_if_absent(&self, _: &str, _: &str, _: Duration) -> anyhow::Result<bool> {
            anyhow::bail!("connection refused")
        }

        async fn ttl(&self, _: &str) -> anyhow::Result<Option<Duration>> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_blocks_dispatch() {
        let h = harness();
        let coordinator = DispatchCoordinator::new(
            Arc::new(BrokenStore),
            h.coordinator.locator().clone(),
            h.objects.clone(),
            vec![h.queues[0].clone() as Arc<dyn WorkQueue>],
            CoordinatorSettings::default(),
        );

        let err = coordinator.request_dispatch(&abc()).await.unwrap_err();
        assert!(matches!(err, DispatchError::CooldownUnavailable(_)));
        assert!(h.queues[0].items().is_empty());
    }

    struct StalledQueue;

    #[async_trait]
    impl WorkQueue for StalledQueue {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn append(&self, _: &[u8]) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_timeout_counts_as_failure() {
        let h = harness();
        let queue_a = h.queues[0].clone();
        let coordinator = DispatchCoordinator::new(
            h.cooldowns.clone(),
            h.coordinator.locator().clone(),
            h.objects.clone(),
            vec![
                queue_a.clone() as Arc<dyn WorkQueue>,
                Arc::new(StalledQueue) as Arc<dyn WorkQueue>,
            ],
            CoordinatorSettings {
                io_timeout: Duration::from_millis(50),
                ..CoordinatorSettings::default()
            },
        );

        let err = coordinator.request_dispatch(&abc()).await.unwrap_err();
        match err {
            DispatchError::PartialDispatchFailure {
                published, failed, ..
            } => {
                assert_eq!(published, vec!["A"]);
                assert_eq!(failed[0].queue, "stalled");
                assert!(failed[0].reason.contains("timed out"));
            }
            other => panic!("expected PartialDispatchFailure, got {:?}", other),
        }
        assert_eq!(queue_a.items().len(), 1);
    }

    /// Signals once a fetch starts, then never finishes it.
    struct HangingObjects {
        started: tokio::sync::Notify,
    }

    #[async_trait]
    impl ObjectStore for HangingObjects {
        async fn fetch(&self, _: &str) -> Result<Vec<u8>, FetchError> {
            self.started.notify_one();
            std::future::pending::<()>().await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_cancelled_dispatch_keeps_cooldown() {
        let h = harness();
        let objects = Arc::new(HangingObjects {
            started: tokio::sync::Notify::new(),
        });
        let coordinator = Arc::new(DispatchCoordinator::new(
            h.cooldowns.clone(),
            h.coordinator.locator().clone(),
            objects.clone(),
            h.queues.iter().map(|q| q.clone() as Arc<dyn WorkQueue>).collect(),
            CoordinatorSettings::default(),
        ));

        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.request_dispatch(&abc()).await })
        };
        objects.started.notified().await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        let remaining = h.cooldowns.ttl("predict-lock:abc").await.unwrap();
        assert!(remaining.is_some_and(|ttl| !ttl.is_zero()));

        let err = coordinator.request_dispatch(&abc()).await.unwrap_err();
        assert!(err.is_rate_limited());
        for queue in &h.queues {
            assert!(queue.items().is_empty());
        }
    }
}

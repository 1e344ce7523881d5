//! In-memory collaborators shared by the coordinator and HTTP tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{
    CoordinatorSettings, DispatchCoordinator, ObjectStore, ResourceId, ResourceLocator, WorkQueue,
};
use crate::cooldown::MemoryCooldownStore;
use crate::storage::FetchError;

pub const IMAGE: &[u8] = b"\x89PNG\r\n\x1a\nfake-screenshot";

pub struct MapLocator(pub HashMap<String, String>);

#[async_trait]
impl ResourceLocator for MapLocator {
    async fn storage_path(&self, id: &ResourceId) -> anyhow::Result<Option<String>> {
        Ok(self.0.get(id.as_str()).cloned())
    }
}

#[derive(Default)]
pub struct MapObjects {
    pub objects: HashMap<String, Vec<u8>>,
    pub fetches: AtomicUsize,
}

impl MapObjects {
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MapObjects {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.objects
            .get(path)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(path.to_string()))
    }
}

pub struct RecordingQueue {
    name: String,
    fail: bool,
    items: Mutex<Vec<Vec<u8>>>,
}

impl RecordingQueue {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail: false,
            items: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail: true,
            items: Mutex::new(Vec::new()),
        })
    }

    pub fn items(&self) -> Vec<Vec<u8>> {
        self.items.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkQueue for RecordingQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn append(&self, payload: &[u8]) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("connection reset");
        }
        self.items.lock().unwrap().push(payload.to_vec());
        Ok(())
    }
}

/// A coordinator wired to in-memory collaborators, with handles kept for
/// assertions.
pub struct Harness {
    pub coordinator: Arc<DispatchCoordinator>,
    pub cooldowns: Arc<MemoryCooldownStore>,
    pub objects: Arc<MapObjects>,
    pub queues: Vec<Arc<RecordingQueue>>,
}

impl Harness {
    /// Queues `A`, `B`, `C`; one known image `id`, stored in the bucket when
    /// `stored` is true.
    pub fn new(id: &str, stored: bool) -> Self {
        Self::with_queues(
            id,
            vec![
                RecordingQueue::new("A"),
                RecordingQueue::new("B"),
                RecordingQueue::new("C"),
            ],
            stored,
        )
    }

    pub fn with_queues(id: &str, queues: Vec<Arc<RecordingQueue>>, stored: bool) -> Self {
        let path = format!("screenshots/{}-home.png", id);
        let cooldowns = Arc::new(MemoryCooldownStore::new());
        let locator = Arc::new(MapLocator(HashMap::from([(id.to_string(), path.clone())])));

        let mut objects = MapObjects::default();
        if stored {
            objects.objects.insert(path, IMAGE.to_vec());
        }
        let objects = Arc::new(objects);

        let coordinator = DispatchCoordinator::new(
            cooldowns.clone(),
            locator,
            objects.clone(),
            queues.iter().map(|q| q.clone() as Arc<dyn WorkQueue>).collect(),
            CoordinatorSettings::default(),
        );

        Self {
            coordinator: Arc::new(coordinator),
            cooldowns,
            objects,
            queues,
        }
    }
}

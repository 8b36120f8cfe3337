//! In-process artifact store for tests and dry runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::debug;

use pagecast_shared::{Artifact, PagecastError, Result, StoredArtifact};

use crate::ArtifactStore;

/// Keeps uploaded bytes in memory, keyed by filename.
///
/// With [`with_max_objects`](MemoryStore::with_max_objects) the oldest object is
/// evicted once the limit is reached, which keeps a long-running dry-run server bounded.
#[derive(Debug)]
pub struct MemoryStore {
    public_base: String,
    objects: Mutex<Objects>,
    max_objects: Option<usize>,
    uploads: AtomicUsize,
    fail_with: Option<String>,
}

/// Objects plus their upload order, oldest first.
#[derive(Debug, Default)]
struct Objects {
    bytes: HashMap<String, Vec<u8>>,
    order: VecDeque<String>,
}

impl Objects {
    /// Insert or replace `filename`, returning whether it already existed.
    fn upsert(&mut self, filename: &str, bytes: Vec<u8>) -> bool {
        let replaced = self.bytes.insert(filename.to_string(), bytes).is_some();
        if replaced {
            self.order.retain(|name| name != filename);
        }
        self.order.push_back(filename.to_string());
        replaced
    }

    fn evict_to(&mut self, max: usize) -> usize {
        let mut evicted = 0;
        while self.order.len() > max {
            if let Some(oldest) = self.order.pop_front() {
                self.bytes.remove(&oldest);
                evicted += 1;
            }
        }
        evicted
    }
}

impl MemoryStore {
    /// A store whose public URLs are `{public_base}/{filename}`.
    pub fn new(public_base: impl Into<String>) -> Self {
        Self {
            public_base: public_base.into().trim_end_matches('/').to_string(),
            objects: Mutex::new(Objects::default()),
            max_objects: None,
            uploads: AtomicUsize::new(0),
            fail_with: None,
        }
    }

    /// A store that rejects every upload with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::new("memory://artifacts")
        }
    }

    /// Hold at most `max` objects (at least one), evicting the oldest upload first.
    pub fn with_max_objects(mut self, max: usize) -> Self {
        self.max_objects = Some(max.max(1));
        self
    }

    /// Number of upload calls that reached the store, successful or not.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Stored bytes for `filename`.
    pub fn get(&self, filename: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.bytes.get(filename).cloned())
    }

    /// Number of distinct objects held.
    pub fn len(&self) -> usize {
        self.objects
            .lock()
            .map(|objects| objects.bytes.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("memory://artifacts")
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn upload(&self, artifact: &Artifact) -> Result<StoredArtifact> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(PagecastError::Upload(message.clone()));
        }

        let (replaced, evicted) = {
            let mut objects = self
                .objects
                .lock()
                .map_err(|_| PagecastError::Upload("memory store lock poisoned".into()))?;
            let replaced = objects.upsert(&artifact.filename, artifact.bytes.clone());
            let evicted = self.max_objects.map_or(0, |max| objects.evict_to(max));
            (replaced, evicted)
        };
        debug!(filename = %artifact.filename, replaced, evicted, "stored artifact in memory");

        Ok(StoredArtifact {
            filename: artifact.filename.clone(),
            public_url: self.public_url(&artifact.filename),
        })
    }

    fn public_url(&self, filename: &str) -> String {
        format!("{}/{filename}", self.public_base)
    }
}

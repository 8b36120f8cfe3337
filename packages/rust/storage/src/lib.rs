//! Object storage for generated artifacts.
//!
//! [`ArtifactStore`] is the seam the pipeline uploads through. [`BucketStore`]
//! talks to a bucket REST service; [`MemoryStore`] keeps objects in process.

mod bucket;
mod memory;

use async_trait::async_trait;

use pagecast_shared::{Artifact, Result, StoredArtifact};

pub use bucket::BucketStore;
pub use memory::MemoryStore;

/// Persists artifacts and resolves their public URLs.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `artifact` under its filename, replacing any existing object.
    async fn upload(&self, artifact: &Artifact) -> Result<StoredArtifact>;

    /// Public URL for `filename`. Deterministic, no network round trip.
    fn public_url(&self, filename: &str) -> String;
}

//! Gallery store abstraction

use crate::distance::DistanceMetric;
use crate::identity::{Identity, Neighbor, UpsertOutcome};
use crate::vector::FeatureVector;
use crate::GalleryError;
use async_trait::async_trait;

/// A catalog of identities keyed by name, answering nearest-neighbour queries.
///
/// Implementations must make `upsert` atomic per name: a concurrent
/// `nearest` or `get` observes either the complete old record or the
/// complete new one. Ties in `nearest` are resolved by an order the store
/// defines and documents; callers must not assume anything else about it.
#[async_trait]
pub trait GalleryStore: Send + Sync {
    /// Insert `identity`, or replace the record with the same name
    async fn upsert(&self, identity: &Identity) -> Result<UpsertOutcome, GalleryError>;

    /// Up to `k` identities ordered nearest first; empty when the gallery is
    async fn nearest(
        &self,
        vector: &FeatureVector,
        k: usize,
    ) -> Result<Vec<Neighbor>, GalleryError>;

    /// Fetch a single record
    async fn get(&self, name: &str) -> Result<Option<Identity>, GalleryError>;

    /// Number of enrolled identities
    async fn len(&self) -> Result<usize, GalleryError>;

    /// Metric the distances in `nearest` are expressed in
    fn metric(&self) -> DistanceMetric;
}

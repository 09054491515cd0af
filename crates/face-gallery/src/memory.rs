//! In-memory gallery

use crate::distance::DistanceMetric;
use crate::identity::{rank, Identity, Neighbor, UpsertOutcome};
use crate::store::GalleryStore;
use crate::vector::FeatureVector;
use crate::GalleryError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Gallery held in a process-local map.
///
/// Records are stored behind `Arc` and swapped whole under the write lock,
/// so readers never see a partially written vector. Readers scan a snapshot
/// taken under the read lock and compute distances without holding it.
/// Equal distances are ordered by name ascending.
pub struct MemoryGallery {
    records: RwLock<HashMap<String, Arc<Identity>>>,
    metric: DistanceMetric,
}

impl MemoryGallery {
    /// Create an empty gallery using `metric`
    pub fn new(metric: DistanceMetric) -> Self {
        info!("Creating in-memory gallery ({} distance)", metric);
        Self {
            records: RwLock::new(HashMap::new()),
            metric,
        }
    }

    fn snapshot(&self) -> Result<Vec<Arc<Identity>>, GalleryError> {
        let records = self
            .records
            .read()
            .map_err(|e| GalleryError::Unavailable(format!("Lock error: {}", e)))?;
        Ok(records.values().cloned().collect())
    }
}

impl Default for MemoryGallery {
    fn default() -> Self {
        Self::new(DistanceMetric::default())
    }
}

#[async_trait]
impl GalleryStore for MemoryGallery {
    async fn upsert(&self, identity: &Identity) -> Result<UpsertOutcome, GalleryError> {
        crate::identity::validate_name(&identity.name)?;

        let record = Arc::new(identity.clone());
        let mut records = self
            .records
            .write()
            .map_err(|e| GalleryError::Unavailable(format!("Lock error: {}", e)))?;

        let outcome = match records.insert(identity.name.clone(), record) {
            Some(_) => UpsertOutcome::Replaced,
            None => UpsertOutcome::Inserted,
        };
        debug!("Upserted {} ({:?})", identity.name, outcome);
        Ok(outcome)
    }

    async fn nearest(
        &self,
        vector: &FeatureVector,
        k: usize,
    ) -> Result<Vec<Neighbor>, GalleryError> {
        let neighbors = self
            .snapshot()?
            .iter()
            .map(|identity| Neighbor {
                name: identity.name.clone(),
                distance: self.metric.distance(vector, &identity.vector),
            })
            .collect();

        Ok(rank(neighbors, k))
    }

    async fn get(&self, name: &str) -> Result<Option<Identity>, GalleryError> {
        let records = self
            .records
            .read()
            .map_err(|e| GalleryError::Unavailable(format!("Lock error: {}", e)))?;
        Ok(records.get(name).map(|record| Identity::clone(record)))
    }

    async fn len(&self) -> Result<usize, GalleryError> {
        let records = self
            .records
            .read()
            .map_err(|e| GalleryError::Unavailable(format!("Lock error: {}", e)))?;
        Ok(records.len())
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }
}

//! Face Gallery
//!
//! Data model and storage for enrolled identities:
//! - Validated 512-d feature vectors
//! - Cosine / Euclidean distance metrics
//! - `GalleryStore` trait with in-memory and SQLite implementations

mod distance;
mod error;
mod identity;
mod memory;
mod sqlite;
mod store;
mod vector;

pub use distance::DistanceMetric;
pub use error::ValidationError;
pub use identity::{validate_name, Identity, Neighbor, UpsertOutcome};
pub use memory::MemoryGallery;
pub use sqlite::SqliteGallery;
pub use store::GalleryStore;
pub use vector::{FeatureVector, EMBEDDING_DIM, NORM_TOLERANCE};

use thiserror::Error;

/// Gallery errors
#[derive(Debug, Error)]
pub enum GalleryError {
    /// Store could not be reached or the query failed
    #[error("Gallery unavailable: {0}")]
    Unavailable(String),
    /// Record rejected before reaching the store
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    /// Stored embedding could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

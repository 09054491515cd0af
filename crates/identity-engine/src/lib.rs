//! Identity Resolution Engine
//!
//! Face recognition against an enrolled gallery:
//! - Primary face selection (largest bounding box)
//! - Threshold-based nearest-identity matching
//! - Gallery enrollment (upsert, single and bulk)
//! - Embedding extraction (ArcFace over ONNX Runtime)

pub mod arcface;
pub mod enrollment;
pub mod extractor;
pub mod matcher;
pub mod selector;

pub use arcface::{ArcFaceExtractor, ExtractorConfig};
pub use enrollment::{
    BulkEnrollment, EnrollmentItem, EnrollmentReport, EnrollmentStatus, EnrollmentSummary,
    GalleryEnrollment,
};
pub use extractor::{
    extract_blocking, extract_blocking_guarded, EmbeddingExtractor, ExtractionError, ImageInput,
    RegionFractions,
};
pub use matcher::{IdentityMatcher, MatchResult, Threshold, DEFAULT_THRESHOLD, UNKNOWN_IDENTITY};
pub use selector::{primary_face_index, select_primary_face, BoundingBox, DetectedFace};

use face_gallery::{GalleryError, ValidationError};
use thiserror::Error;

/// Identity resolution error types
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid embedding: {0}")]
    InvalidEmbedding(ValidationError),

    #[error("Identity name must not be empty")]
    InvalidName,

    #[error("No face detected")]
    NoFaceDetected,

    #[error("Gallery unavailable: {0}")]
    MatchUnavailable(String),

    #[error("Embedding extraction failed: {0}")]
    Extraction(String),

    #[error("Invalid distance threshold: {0}")]
    InvalidThreshold(f32),
}

impl IdentityError {
    /// Only store failures are worth retrying unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, IdentityError::MatchUnavailable(_))
    }
}

impl From<ValidationError> for IdentityError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::EmptyName => IdentityError::InvalidName,
            other => IdentityError::InvalidEmbedding(other),
        }
    }
}

impl From<GalleryError> for IdentityError {
    fn from(err: GalleryError) -> Self {
        match err {
            GalleryError::Invalid(validation) => validation.into(),
            other => IdentityError::MatchUnavailable(other.to_string()),
        }
    }
}

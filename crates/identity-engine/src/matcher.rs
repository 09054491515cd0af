//! Threshold-based identity matching

use crate::selector::{select_primary_face, DetectedFace};
use crate::IdentityError;
use face_gallery::{FeatureVector, GalleryStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Name reported when no gallery identity is close enough
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Recommended cosine distance threshold for ArcFace embeddings
pub const DEFAULT_THRESHOLD: f32 = 0.7;

/// Maximum distance (exclusive) at which a match is accepted
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct Threshold(f32);

impl Threshold {
    /// Must be finite and strictly positive
    pub fn new(value: f32) -> Result<Self, IdentityError> {
        if value.is_finite() && value > 0.0 {
            Ok(Self(value))
        } else {
            Err(IdentityError::InvalidThreshold(value))
        }
    }

    pub fn value(&self) -> f32 {
        self.0
    }

    /// `distance < threshold`; equality is a rejection
    pub fn accepts(&self, distance: f32) -> bool {
        distance < self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self(DEFAULT_THRESHOLD)
    }
}

impl TryFrom<f32> for Threshold {
    type Error = IdentityError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Threshold> for f32 {
    fn from(threshold: Threshold) -> Self {
        threshold.0
    }
}

/// Outcome of matching one embedding against the gallery.
///
/// `identity` is set only when `distance` is present and under the
/// threshold. An unknown result keeps the rejected distance when there was
/// a nearest neighbour, and has none for an empty gallery or no face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    identity: Option<String>,
    distance: Option<f32>,
}

impl MatchResult {
    fn known(name: String, distance: f32) -> Self {
        Self {
            identity: Some(name),
            distance: Some(distance),
        }
    }

    /// No accepted match, optionally with the rejected distance
    pub fn unknown(distance: Option<f32>) -> Self {
        Self {
            identity: None,
            distance,
        }
    }

    /// Matched gallery name, or [`UNKNOWN_IDENTITY`]
    pub fn identity_name(&self) -> &str {
        self.identity.as_deref().unwrap_or(UNKNOWN_IDENTITY)
    }

    pub fn is_known(&self) -> bool {
        self.identity.is_some()
    }

    pub fn distance(&self) -> Option<f32> {
        self.distance
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.distance {
            Some(distance) => write!(f, "{} ({:.4})", self.identity_name(), distance),
            None => f.write_str(self.identity_name()),
        }
    }
}

/// Resolves embeddings to gallery identities.
///
/// The threshold is fixed at construction; build a new matcher to change it.
/// Matching never writes to the gallery.
pub struct IdentityMatcher {
    store: Arc<dyn GalleryStore>,
    threshold: Threshold,
}

impl IdentityMatcher {
    pub fn new(store: Arc<dyn GalleryStore>, threshold: Threshold) -> Self {
        info!(
            "Creating identity matcher: threshold={} ({} distance)",
            threshold.value(),
            store.metric()
        );
        Self { store, threshold }
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    /// Match a single embedding.
    ///
    /// A store failure is `MatchUnavailable`, never an unknown result.
    pub async fn match_vector(&self, vector: &FeatureVector) -> Result<MatchResult, IdentityError> {
        let nearest = self.store.nearest(vector, 1).await.map_err(|e| {
            debug!("Nearest-neighbour query failed: {}", e);
            IdentityError::MatchUnavailable(e.to_string())
        })?;

        let result = match nearest.into_iter().next() {
            None => MatchResult::unknown(None),
            Some(neighbor) if self.threshold.accepts(neighbor.distance) => {
                MatchResult::known(neighbor.name, neighbor.distance)
            }
            Some(neighbor) => MatchResult::unknown(Some(neighbor.distance)),
        };

        debug!("Match result: {}", result);
        Ok(result)
    }

    /// Select the primary face and match it; no face resolves to unknown
    pub async fn match_faces(&self, faces: Vec<DetectedFace>) -> Result<MatchResult, IdentityError> {
        match select_primary_face(faces) {
            Some(face) => self.match_vector(&face.vector).await,
            None => Ok(MatchResult::unknown(None)),
        }
    }
}

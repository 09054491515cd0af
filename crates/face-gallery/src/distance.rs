//! Distance metrics over feature vectors

use crate::vector::FeatureVector;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metric used to rank gallery identities against a query
///
/// Over unit vectors the two are monotonic with each other
/// (`euclidean² = 2 · cosine`), but a threshold is only meaningful for
/// the metric it was calibrated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`, in `[0, 2]`
    #[default]
    Cosine,
    /// `‖a - b‖₂`, in `[0, 2]` for unit vectors
    Euclidean,
}

impl DistanceMetric {
    /// Distance between two vectors (0.0 = identical)
    pub fn distance(&self, a: &FeatureVector, b: &FeatureVector) -> f32 {
        match self {
            DistanceMetric::Cosine => {
                let norm = a.norm() * b.norm();
                if norm > 0.0 {
                    (1.0 - a.dot(b) / norm).max(0.0)
                } else {
                    1.0
                }
            }
            DistanceMetric::Euclidean => a
                .as_slice()
                .iter()
                .zip(b.as_slice())
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
        }
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

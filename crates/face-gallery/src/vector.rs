//! Fixed-length, L2-normalized face embeddings

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

/// Number of components produced by the ArcFace family of models
pub const EMBEDDING_DIM: usize = 512;

/// Allowed deviation of the vector magnitude from 1.0
pub const NORM_TOLERANCE: f32 = 1e-3;

/// A validated face embedding.
///
/// Construction goes through [`FeatureVector::new`], so every value of this
/// type has exactly [`EMBEDDING_DIM`] finite components and unit magnitude.
/// Nothing here pads, truncates or re-normalizes its input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct FeatureVector {
    components: Vec<f32>,
}

impl FeatureVector {
    /// Validate raw components as a feature vector
    pub fn new(components: Vec<f32>) -> Result<Self, ValidationError> {
        if components.len() != EMBEDDING_DIM {
            return Err(ValidationError::WrongLength {
                expected: EMBEDDING_DIM,
                actual: components.len(),
            });
        }

        if let Some(index) = components.iter().position(|c| !c.is_finite()) {
            return Err(ValidationError::NonFinite { index });
        }

        let norm = l2_norm(&components);
        if (norm - 1.0).abs() > NORM_TOLERANCE {
            return Err(ValidationError::NotNormalized { norm });
        }

        Ok(Self { components })
    }

    /// Unit vector along a single axis
    ///
    /// Axes are pairwise orthogonal, which makes these convenient as
    /// well-separated reference identities.
    pub fn unit_axis(axis: usize) -> Self {
        let mut components = vec![0.0; EMBEDDING_DIM];
        components[axis % EMBEDDING_DIM] = 1.0;
        Self { components }
    }

    /// Borrow the components
    pub fn as_slice(&self) -> &[f32] {
        &self.components
    }

    /// Take ownership of the components
    pub fn into_inner(self) -> Vec<f32> {
        self.components
    }

    /// Vector magnitude
    pub fn norm(&self) -> f32 {
        l2_norm(&self.components)
    }

    /// Dot product with another vector
    pub fn dot(&self, other: &FeatureVector) -> f32 {
        self.components
            .iter()
            .zip(other.components.iter())
            .map(|(a, b)| a * b)
            .sum()
    }
}

impl TryFrom<Vec<f32>> for FeatureVector {
    type Error = ValidationError;

    fn try_from(components: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(components)
    }
}

impl From<FeatureVector> for Vec<f32> {
    fn from(vector: FeatureVector) -> Self {
        vector.components
    }
}

impl AsRef<[f32]> for FeatureVector {
    fn as_ref(&self) -> &[f32] {
        &self.components
    }
}

fn l2_norm(components: &[f32]) -> f32 {
    components.iter().map(|c| c * c).sum::<f32>().sqrt()
}

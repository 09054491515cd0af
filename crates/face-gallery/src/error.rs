//! Validation Error Types

use thiserror::Error;

/// Errors raised when a vector or identity name fails its invariants
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Embedding has the wrong number of components
    #[error("Embedding has {actual} components, expected {expected}")]
    WrongLength { expected: usize, actual: usize },

    /// Embedding magnitude is not 1.0 within tolerance
    #[error("Embedding is not L2-normalized (norm = {norm:.6})")]
    NotNormalized { norm: f32 },

    /// Embedding contains NaN or infinity
    #[error("Embedding component {index} is not finite")]
    NonFinite { index: usize },

    /// Identity name is empty or whitespace
    #[error("Identity name must not be empty")]
    EmptyName,
}

impl ValidationError {
    /// True for every embedding-shape failure (everything except the name check)
    pub fn is_embedding(&self) -> bool {
        !matches!(self, ValidationError::EmptyName)
    }
}

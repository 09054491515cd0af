//! Gallery records

use crate::error::ValidationError;
use crate::vector::FeatureVector;
use serde::{Deserialize, Serialize};

/// An enrolled person. The name is the only key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub vector: FeatureVector,
    /// Where the embedding came from (e.g. the enrollment image path)
    pub source: Option<String>,
}

impl Identity {
    /// Create an identity after checking the name
    pub fn new(name: impl Into<String>, vector: FeatureVector) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            vector,
            source: None,
        })
    }

    /// Attach a source reference
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Reject empty or whitespace-only names
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        Err(ValidationError::EmptyName)
    } else {
        Ok(())
    }
}

/// One entry of a nearest-neighbour answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub name: String,
    pub distance: f32,
}

/// Whether an upsert created or replaced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Sort neighbours nearest first, equal distances by name ascending,
/// and keep the first `k`.
pub(crate) fn rank(mut neighbors: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    neighbors.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.name.cmp(&b.name))
    });
    neighbors.truncate(k);
    neighbors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_name_rejected() {
        let v = FeatureVector::unit_axis(0);
        assert_eq!(Identity::new("", v.clone()), Err(ValidationError::EmptyName));
        assert_eq!(Identity::new("  \t", v.clone()), Err(ValidationError::EmptyName));
        assert!(Identity::new("alice", v).is_ok());
    }

    #[test]
    fn test_rank_breaks_ties_by_name() {
        let ranked = rank(
            vec![
                Neighbor { name: "carol".into(), distance: 0.4 },
                Neighbor { name: "bob".into(), distance: 0.2 },
                Neighbor { name: "alice".into(), distance: 0.2 },
            ],
            2,
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].name, "alice");
        assert_eq!(ranked[1].name, "bob");
    }
}

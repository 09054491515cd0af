//! Primary face selection

use face_gallery::FeatureVector;
use serde::{Deserialize, Serialize};

/// Face bounding box, in pixels or normalized units (consistently per image)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// `(right - left) * (bottom - top)`; inverted or NaN edges count as zero
    pub fn area(&self) -> f32 {
        let width = (self.right - self.left).max(0.0);
        let height = (self.bottom - self.top).max(0.0);
        width * height
    }
}

/// A face found by the extractor in one image
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub vector: FeatureVector,
}

/// Index of the face with the largest box; the earliest one wins a tie.
pub fn primary_face_index(faces: &[DetectedFace]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, face) in faces.iter().enumerate() {
        let area = face.bbox.area();
        match best {
            Some((_, best_area)) if area <= best_area => {}
            _ => best = Some((index, area)),
        }
    }
    best.map(|(index, _)| index)
}

/// Pick the event's primary subject out of everything the extractor found.
///
/// Returns `None` when there are no faces; that is an expected outcome,
/// not an error.
pub fn select_primary_face(mut faces: Vec<DetectedFace>) -> Option<DetectedFace> {
    let index = primary_face_index(&faces)?;
    Some(faces.swap_remove(index))
}

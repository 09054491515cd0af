//! Embedding extractor interface

use crate::selector::DetectedFace;
use face_gallery::ValidationError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Extractor error types
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Image decoding failed: {0}")]
    Decode(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Extractor produced an invalid embedding: {0}")]
    InvalidEmbedding(#[from] ValidationError),

    #[error("Empty crop region")]
    EmptyRegion,
}

/// Region of interest as fractions of the image size, each in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionFractions {
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

impl RegionFractions {
    /// Pixel rectangle `(x, y, width, height)` for an image of the given size.
    ///
    /// Fractions are clamped to `[0, 1]`. `None` if the region is empty.
    pub fn to_pixels(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let scale = |fraction: f32, extent: u32| -> u32 {
            let fraction = if fraction.is_finite() {
                fraction.clamp(0.0, 1.0)
            } else {
                0.0
            };
            (fraction * extent as f32) as u32
        };

        let left = scale(self.left, width);
        let right = scale(self.right, width);
        let top = scale(self.top, height);
        let bottom = scale(self.bottom, height);

        if right <= left || bottom <= top {
            return None;
        }
        Some((left, top, right - left, bottom - top))
    }
}

/// Encoded image handed to an extractor
#[derive(Debug, Clone)]
pub struct ImageInput {
    /// Encoded bytes (JPEG, PNG, ...)
    pub data: Vec<u8>,
    /// Optional region to restrict extraction to
    pub region: Option<RegionFractions>,
}

impl ImageInput {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, region: None }
    }

    pub fn with_region(mut self, region: Option<RegionFractions>) -> Self {
        self.region = region;
        self
    }
}

/// Turns an image into zero or more faces with normalized embeddings.
///
/// Calls may be CPU-heavy; async callers go through [`extract_blocking`].
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(&self, image: &ImageInput) -> Result<Vec<DetectedFace>, ExtractionError>;
}

/// Run an extractor on the blocking thread pool
pub async fn extract_blocking(
    extractor: Arc<dyn EmbeddingExtractor>,
    image: ImageInput,
) -> Result<Vec<DetectedFace>, ExtractionError> {
    extract_blocking_guarded(extractor, image, ()).await
}

/// Like [`extract_blocking`], with `guard` owned by the blocking job.
///
/// The guard is dropped when the extractor call returns, even if the caller
/// stopped waiting for it (e.g. a timed-out future). Pass a semaphore permit
/// to keep abandoned calls counted against a concurrency limit.
pub async fn extract_blocking_guarded<G: Send + 'static>(
    extractor: Arc<dyn EmbeddingExtractor>,
    image: ImageInput,
    guard: G,
) -> Result<Vec<DetectedFace>, ExtractionError> {
    tokio::task::spawn_blocking(move || {
        let _guard = guard;
        extractor.extract(&image)
    })
    .await
    .map_err(|e| ExtractionError::Inference(format!("Extractor task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_to_pixels() {
        let region = RegionFractions {
            top: 0.25,
            bottom: 0.75,
            left: 0.1,
            right: 0.6,
        };
        assert_eq!(region.to_pixels(200, 100), Some((20, 25, 100, 50)));
    }

    #[test]
    fn test_region_is_clamped() {
        let region = RegionFractions {
            top: -0.5,
            bottom: 1.5,
            left: 0.0,
            right: 1.0,
        };
        assert_eq!(region.to_pixels(64, 32), Some((0, 0, 64, 32)));
    }

    #[test]
    fn test_empty_region() {
        let region = RegionFractions {
            top: 0.5,
            bottom: 0.5,
            left: 0.0,
            right: 1.0,
        };
        assert_eq!(region.to_pixels(64, 64), None);
    }

    struct SleepyExtractor(std::time::Duration);

    impl EmbeddingExtractor for SleepyExtractor {
        fn extract(&self, _image: &ImageInput) -> Result<Vec<DetectedFace>, ExtractionError> {
            std::thread::sleep(self.0);
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_guard_outlives_abandoned_call() {
        use std::time::Duration;

        let extractor: Arc<dyn EmbeddingExtractor> =
            Arc::new(SleepyExtractor(Duration::from_millis(150)));
        let guard = Arc::new(());

        let call = extract_blocking_guarded(extractor, ImageInput::new(vec![1]), Arc::clone(&guard));
        assert!(tokio::time::timeout(Duration::from_millis(10), call).await.is_err());

        // caller gave up; the blocking job still holds the guard
        assert_eq!(Arc::strong_count(&guard), 2);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(Arc::strong_count(&guard), 1);
    }
}

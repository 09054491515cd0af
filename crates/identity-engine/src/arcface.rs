//! ArcFace embedding extractor (ONNX Runtime)

use crate::extractor::{EmbeddingExtractor, ExtractionError, ImageInput};
use crate::selector::{BoundingBox, DetectedFace};
use face_gallery::FeatureVector;
use image::imageops::FilterType;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Extractor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Path to the ArcFace ONNX model
    pub model_path: String,
    /// Square input edge in pixels
    pub input_size: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            model_path: "models/arcface_r100.onnx".to_string(),
            input_size: 112,
        }
    }
}

/// Embeds pre-cropped face images.
///
/// Inbound images are already face crops, so the whole (optionally
/// region-restricted) image is treated as a single detected face.
pub struct ArcFaceExtractor {
    session: Session,
    input_size: u32,
}

impl ArcFaceExtractor {
    /// Load the model
    pub fn new(config: &ExtractorConfig) -> Result<Self, ExtractionError> {
        info!("Loading face embedding model from {}", config.model_path);

        let session = Session::builder()
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|builder| builder.commit_from_file(&config.model_path))
            .map_err(|e| {
                error!("Failed to load embedding model: {}", e);
                ExtractionError::ModelLoad(e.to_string())
            })?;

        Ok(Self {
            session,
            input_size: config.input_size,
        })
    }

    fn preprocess(&self, image: &ImageInput) -> Result<(Array4<f32>, BoundingBox), ExtractionError> {
        let mut img = image::load_from_memory(&image.data)
            .map_err(|e| ExtractionError::Decode(e.to_string()))?;

        if let Some(region) = &image.region {
            let (x, y, w, h) = region
                .to_pixels(img.width(), img.height())
                .ok_or(ExtractionError::EmptyRegion)?;
            img = img.crop_imm(x, y, w, h);
        }

        let bbox = BoundingBox::new(0.0, 0.0, img.width() as f32, img.height() as f32);
        let size = self.input_size;
        let resized = image::imageops::resize(&img.to_rgb8(), size, size, FilterType::Triangle);

        // 1x3xHxW, scaled to [-1, 1]
        let mut input = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                input[[0, channel, y as usize, x as usize]] =
                    (pixel[channel] as f32 - 127.5) / 127.5;
            }
        }

        Ok((input, bbox))
    }
}

impl EmbeddingExtractor for ArcFaceExtractor {
    fn extract(&self, image: &ImageInput) -> Result<Vec<DetectedFace>, ExtractionError> {
        let (input, bbox) = self.preprocess(image)?;

        let outputs = self
            .session
            .run(ort::inputs![input].map_err(|e| ExtractionError::Inference(e.to_string()))?)
            .map_err(|e| ExtractionError::Inference(e.to_string()))?;

        let raw: Vec<f32> = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractionError::Inference(e.to_string()))?
            .iter()
            .copied()
            .collect();

        let vector = FeatureVector::new(l2_normalize(raw))?;
        debug!("Extracted embedding for {}x{} face", bbox.right, bbox.bottom);

        Ok(vec![DetectedFace { bbox, vector }])
    }
}

/// Scale to unit length; an all-zero vector is returned unchanged
pub fn l2_normalize(mut components: Vec<f32>) -> Vec<f32> {
    let norm = components.iter().map(|c| c * c).sum::<f32>().sqrt();
    if norm > 0.0 {
        for c in components.iter_mut() {
            *c /= norm;
        }
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use face_gallery::EMBEDDING_DIM;

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_normalized_model_output_is_a_valid_vector() {
        let raw: Vec<f32> = (0..EMBEDDING_DIM).map(|i| (i % 7) as f32 - 3.0).collect();
        assert!(FeatureVector::new(l2_normalize(raw)).is_ok());
    }
}

//! Gallery enrollment, single and bulk

use crate::extractor::{extract_blocking, EmbeddingExtractor, ExtractionError, ImageInput};
use crate::selector::select_primary_face;
use crate::IdentityError;
use face_gallery::{validate_name, FeatureVector, GalleryStore, Identity, UpsertOutcome};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Inserts or replaces named embeddings in the gallery.
///
/// Validation failures are returned to the caller, never swallowed.
#[derive(Clone)]
pub struct GalleryEnrollment {
    store: Arc<dyn GalleryStore>,
}

impl GalleryEnrollment {
    pub fn new(store: Arc<dyn GalleryStore>) -> Self {
        Self { store }
    }

    /// Upsert `name` with an already validated vector
    pub async fn enroll(
        &self,
        name: &str,
        vector: FeatureVector,
        source: Option<&str>,
    ) -> Result<UpsertOutcome, IdentityError> {
        let mut identity = Identity::new(name, vector)?;
        if let Some(source) = source {
            identity = identity.with_source(source);
        }

        let outcome = self
            .store
            .upsert(&identity)
            .await
            .map_err(IdentityError::from)?;

        info!("Enrolled {} ({:?})", identity.name, outcome);
        Ok(outcome)
    }

    /// Upsert `name` with raw components, validating them first
    pub async fn enroll_components(
        &self,
        name: &str,
        components: Vec<f32>,
        source: Option<&str>,
    ) -> Result<UpsertOutcome, IdentityError> {
        validate_name(name)?;
        let vector = FeatureVector::new(components)?;
        self.enroll(name, vector, source).await
    }
}

/// One person to enroll from an image
#[derive(Debug, Clone)]
pub struct EnrollmentItem {
    pub name: String,
    pub image: ImageInput,
    /// Reference stored with the record (e.g. the file path)
    pub source: Option<String>,
}

/// Per-item result of a bulk enrollment
#[derive(Debug, Clone, PartialEq)]
pub enum EnrollmentStatus {
    Enrolled(UpsertOutcome),
    NoFaceFound,
    InvalidName,
    InvalidEmbedding(String),
    Failed(String),
}

impl EnrollmentStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, EnrollmentStatus::Enrolled(_))
    }
}

/// Report line for one item
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentReport {
    pub name: String,
    pub status: EnrollmentStatus,
}

impl fmt::Display for EnrollmentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            EnrollmentStatus::Enrolled(UpsertOutcome::Inserted) => {
                write!(f, "[OK]      {}: enrolled", self.name)
            }
            EnrollmentStatus::Enrolled(UpsertOutcome::Replaced) => {
                write!(f, "[OK]      {}: updated", self.name)
            }
            EnrollmentStatus::NoFaceFound => write!(f, "[SKIPPED] {}: no face found", self.name),
            EnrollmentStatus::InvalidName => write!(f, "[FAILED]  {:?}: invalid name", self.name),
            EnrollmentStatus::InvalidEmbedding(reason) => {
                write!(f, "[FAILED]  {}: invalid embedding ({})", self.name, reason)
            }
            EnrollmentStatus::Failed(reason) => write!(f, "[FAILED]  {}: {}", self.name, reason),
        }
    }
}

/// Totals over a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrollmentSummary {
    pub inserted: usize,
    pub replaced: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl EnrollmentSummary {
    pub fn from_reports(reports: &[EnrollmentReport]) -> Self {
        let mut summary = Self::default();
        for report in reports {
            match report.status {
                EnrollmentStatus::Enrolled(UpsertOutcome::Inserted) => summary.inserted += 1,
                EnrollmentStatus::Enrolled(UpsertOutcome::Replaced) => summary.replaced += 1,
                EnrollmentStatus::NoFaceFound => summary.skipped += 1,
                _ => summary.failed += 1,
            }
        }
        summary
    }
}

impl fmt::Display for EnrollmentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} enrolled, {} updated, {} skipped, {} failed",
            self.inserted, self.replaced, self.skipped, self.failed
        )
    }
}

/// Image → extractor → primary face → enrollment, item by item
pub struct BulkEnrollment {
    extractor: Arc<dyn EmbeddingExtractor>,
    enrollment: GalleryEnrollment,
}

impl BulkEnrollment {
    pub fn new(extractor: Arc<dyn EmbeddingExtractor>, enrollment: GalleryEnrollment) -> Self {
        Self {
            extractor,
            enrollment,
        }
    }

    /// Enroll every item; a failing item never stops the batch
    pub async fn enroll_batch(&self, items: Vec<EnrollmentItem>) -> Vec<EnrollmentReport> {
        info!("Enrolling batch of {} items", items.len());

        let mut reports = Vec::with_capacity(items.len());
        for item in items {
            reports.push(self.enroll_item(item).await);
        }
        reports
    }

    /// Enroll a single item and describe what happened
    pub async fn enroll_item(&self, item: EnrollmentItem) -> EnrollmentReport {
        let EnrollmentItem {
            name,
            image,
            source,
        } = item;

        let status = match self.try_enroll(&name, image, source.as_deref()).await {
            Ok(outcome) => EnrollmentStatus::Enrolled(outcome),
            Err(IdentityError::NoFaceDetected) => {
                warn!("No face found for {}", name);
                EnrollmentStatus::NoFaceFound
            }
            Err(IdentityError::InvalidName) => {
                error!("Invalid identity name {:?}", name);
                EnrollmentStatus::InvalidName
            }
            Err(IdentityError::InvalidEmbedding(reason)) => {
                error!("Invalid embedding for {}: {}", name, reason);
                EnrollmentStatus::InvalidEmbedding(reason.to_string())
            }
            Err(e) => {
                error!("Enrollment of {} failed: {}", name, e);
                EnrollmentStatus::Failed(e.to_string())
            }
        };

        EnrollmentReport { name, status }
    }

    async fn try_enroll(
        &self,
        name: &str,
        image: ImageInput,
        source: Option<&str>,
    ) -> Result<UpsertOutcome, IdentityError> {
        validate_name(name)?;

        let faces = extract_blocking(Arc::clone(&self.extractor), image)
            .await
            .map_err(|e| match e {
                ExtractionError::InvalidEmbedding(reason) => IdentityError::InvalidEmbedding(reason),
                other => IdentityError::Extraction(other.to_string()),
            })?;

        let face = select_primary_face(faces).ok_or(IdentityError::NoFaceDetected)?;
        self.enrollment.enroll(name, face.vector, source).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{BoundingBox, DetectedFace};
    use face_gallery::{DistanceMetric, MemoryGallery, ValidationError, EMBEDDING_DIM};
    use std::collections::HashMap;

    /// Extractor keyed on the first byte of the image
    struct ScriptedExtractor {
        script: HashMap<u8, Vec<DetectedFace>>,
    }

    impl EmbeddingExtractor for ScriptedExtractor {
        fn extract(&self, image: &ImageInput) -> Result<Vec<DetectedFace>, ExtractionError> {
            match image.data.first() {
                Some(0xFF) => Err(ExtractionError::InvalidEmbedding(
                    ValidationError::WrongLength {
                        expected: EMBEDDING_DIM,
                        actual: 128,
                    },
                )),
                Some(0xEE) => Err(ExtractionError::Decode("not an image".into())),
                Some(key) => Ok(self.script.get(key).cloned().unwrap_or_default()),
                None => Ok(Vec::new()),
            }
        }
    }

    fn face(axis: usize, edge: f32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox::new(0.0, 0.0, edge, edge),
            vector: FeatureVector::unit_axis(axis),
        }
    }

    fn item(name: &str, key: u8) -> EnrollmentItem {
        EnrollmentItem {
            name: name.to_string(),
            image: ImageInput::new(vec![key]),
            source: Some(format!("faces/{}.jpg", name)),
        }
    }

    fn setup() -> (Arc<MemoryGallery>, GalleryEnrollment) {
        let gallery = Arc::new(MemoryGallery::new(DistanceMetric::Cosine));
        let enrollment = GalleryEnrollment::new(gallery.clone());
        (gallery, enrollment)
    }

    #[tokio::test]
    async fn test_enroll_is_idempotent() {
        let (gallery, enrollment) = setup();
        let v = FeatureVector::unit_axis(4);

        enrollment.enroll("alice", v.clone(), None).await.unwrap();
        let before = gallery.get("alice").await.unwrap();
        enrollment.enroll("alice", v.clone(), None).await.unwrap();

        assert_eq!(gallery.len().await.unwrap(), 1);
        assert_eq!(gallery.get("alice").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_enroll_is_upsert() {
        let (gallery, enrollment) = setup();

        let first = enrollment
            .enroll("alice", FeatureVector::unit_axis(1), None)
            .await
            .unwrap();
        let second = enrollment
            .enroll("alice", FeatureVector::unit_axis(2), None)
            .await
            .unwrap();

        assert_eq!(first, UpsertOutcome::Inserted);
        assert_eq!(second, UpsertOutcome::Replaced);
        assert_eq!(gallery.len().await.unwrap(), 1);
        assert_eq!(
            gallery.get("alice").await.unwrap().unwrap().vector,
            FeatureVector::unit_axis(2)
        );
    }

    #[tokio::test]
    async fn test_validation_errors_surface() {
        let (gallery, enrollment) = setup();

        let err = enrollment
            .enroll("", FeatureVector::unit_axis(0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::InvalidName));

        let err = enrollment
            .enroll_components("bob", vec![0.5; 100], None)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::InvalidEmbedding(_)));

        let err = enrollment
            .enroll_components("bob", vec![0.5; EMBEDDING_DIM], None)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::InvalidEmbedding(_)));

        assert_eq!(gallery.len().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enrollment_of_different_names() {
        let (gallery, enrollment) = setup();

        let mut handles = Vec::new();
        for i in 0..32 {
            let enrollment = enrollment.clone();
            handles.push(tokio::spawn(async move {
                enrollment
                    .enroll(&format!("person-{}", i), FeatureVector::unit_axis(i), None)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(gallery.len().await.unwrap(), 32);
        for i in 0..32 {
            let stored = gallery.get(&format!("person-{}", i)).await.unwrap().unwrap();
            assert_eq!(stored.vector, FeatureVector::unit_axis(i));
        }
    }

    #[tokio::test]
    async fn test_bulk_enrollment_reports_each_item() {
        let (gallery, enrollment) = setup();
        let mut script = HashMap::new();
        script.insert(1, vec![face(10, 20.0), face(11, 50.0)]);
        script.insert(2, vec![face(12, 30.0)]);
        script.insert(3, Vec::new());

        let bulk = BulkEnrollment::new(Arc::new(ScriptedExtractor { script }), enrollment);
        let reports = bulk
            .enroll_batch(vec![
                item("alice", 1),
                item("bob", 3),
                item("carol", 0xFF),
                item("dave", 2),
                item("", 2),
                item("erin", 0xEE),
            ])
            .await;

        let statuses: Vec<_> = reports.iter().map(|r| r.status.clone()).collect();
        assert_eq!(statuses[0], EnrollmentStatus::Enrolled(UpsertOutcome::Inserted));
        assert_eq!(statuses[1], EnrollmentStatus::NoFaceFound);
        assert!(matches!(statuses[2], EnrollmentStatus::InvalidEmbedding(_)));
        assert_eq!(statuses[3], EnrollmentStatus::Enrolled(UpsertOutcome::Inserted));
        assert_eq!(statuses[4], EnrollmentStatus::InvalidName);
        assert!(matches!(statuses[5], EnrollmentStatus::Failed(_)));

        // largest face wins
        let alice = gallery.get("alice").await.unwrap().unwrap();
        assert_eq!(alice.vector, FeatureVector::unit_axis(11));
        assert_eq!(alice.source.as_deref(), Some("faces/alice.jpg"));
        assert_eq!(gallery.len().await.unwrap(), 2);

        let summary = EnrollmentSummary::from_reports(&reports);
        assert_eq!(
            summary,
            EnrollmentSummary {
                inserted: 2,
                replaced: 0,
                skipped: 1,
                failed: 3,
            }
        );
        assert!(reports[1].to_string().contains("no face found"));
    }
}

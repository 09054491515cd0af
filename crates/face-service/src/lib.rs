//! Face Identity Service
//!
//! Wires the gallery, the ArcFace extractor and the event dispatcher to the
//! MQTT bus, and provides folder-based gallery enrollment.

pub mod config;

pub use crate::config::ServiceConfig;

use crate::config::LoggingConfig;
use event_dispatch::{Dispatcher, MqttBridge, ResolvedIdentity};
use face_gallery::{GalleryError, GalleryStore, SqliteGallery};
use identity_engine::{
    ArcFaceExtractor, BulkEnrollment, EmbeddingExtractor, EnrollmentItem, EnrollmentReport,
    EnrollmentStatus, ExtractionError, GalleryEnrollment, IdentityMatcher, ImageInput,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const INBOX_CAPACITY: usize = 256;
const OUTBOX_CAPACITY: usize = 256;
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Service error types
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Gallery error: {0}")]
    Gallery(#[from] GalleryError),

    #[error("Extractor error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Metrics setup failed: {0}")]
    Metrics(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> Result<(), ServiceError> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(config.max_level()?)
        .with_target(true);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| ServiceError::Logging(e.to_string()))
}

/// Install the Prometheus exporter on `listen` and describe the service metrics
pub fn init_metrics(listen: &str) -> Result<(), ServiceError> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| ServiceError::Metrics(format!("invalid listen address '{}': {}", listen, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ServiceError::Metrics(e.to_string()))?;

    metrics::describe_counter!("face_events_received_total", "Messages taken from the bus");
    metrics::describe_counter!("face_events_total", "Events by terminal outcome");
    metrics::describe_counter!("face_events_shed_total", "Messages dropped because the inbox was full");
    metrics::describe_counter!("face_matches_total", "Match results, known or unknown");
    metrics::describe_counter!(
        "face_match_unavailable_total",
        "Events dropped because the gallery could not be queried"
    );
    metrics::describe_histogram!("face_match_distance", "Distance to the nearest identity");

    info!("Prometheus exporter listening on {}", addr);
    Ok(())
}

/// Run the resolution service until Ctrl-C or until the bus connection ends
pub async fn run_service(config: ServiceConfig) -> Result<(), ServiceError> {
    config.validate()?;
    let threshold = config.threshold()?;

    let gallery = Arc::new(
        SqliteGallery::connect(
            &config.gallery.url,
            config.gallery.max_connections,
            config.gallery.metric,
        )
        .await?,
    );
    info!("Gallery holds {} identities", gallery.len().await?);

    let extractor: Arc<dyn EmbeddingExtractor> = Arc::new(ArcFaceExtractor::new(&config.extractor)?);
    let matcher = Arc::new(IdentityMatcher::new(gallery.clone(), threshold));
    let dispatcher = Arc::new(Dispatcher::new(config.dispatcher.clone(), extractor, matcher));

    let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
    let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);

    let bridge = Arc::new(MqttBridge::connect(&config.mqtt, inbox_tx));
    let sink = tokio::spawn(publish_resolved(Arc::clone(&bridge), outbox_rx));
    let mut dispatch = tokio::spawn(Arc::clone(&dispatcher).run(inbox_rx, outbox_tx));

    let mut dispatch_finished = false;
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
        }
        result = &mut dispatch => {
            dispatch_finished = true;
            if let Err(e) = result {
                error!("Dispatcher task failed: {}", e);
            }
        }
    }

    // stopping intake closes the inbox; in-flight events and the outbox
    // drain while the connection can still publish
    bridge.stop_intake();
    if !dispatch_finished {
        if let Err(e) = dispatch.await {
            error!("Dispatcher task failed: {}", e);
        }
    }
    if let Err(e) = sink.await {
        error!("Publisher task failed: {}", e);
    }
    bridge.shutdown().await;

    gallery.close().await;
    info!("Face identity service stopped");
    Ok(())
}

async fn publish_resolved(bridge: Arc<MqttBridge>, mut outbox: mpsc::Receiver<ResolvedIdentity>) {
    while let Some(resolved) = outbox.recv().await {
        info!("[EVENT] {}: {}", resolved.source, resolved.identity_name);
        if let Err(e) = bridge.publish(&resolved).await {
            warn!("Failed to publish identity for {}: {}", resolved.source, e);
        }
    }
}

/// Every JPEG/PNG file in `dir`, in path order
pub fn collect_enrollment_paths(dir: &Path) -> Result<Vec<PathBuf>, ServiceError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_image(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Identity name for an image file: its stem
pub fn enrollment_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Read one image into an enrollment item
pub async fn load_enrollment_item(path: &Path) -> Result<EnrollmentItem, std::io::Error> {
    let data = tokio::fs::read(path).await?;
    Ok(EnrollmentItem {
        name: enrollment_name(path),
        image: ImageInput::new(data),
        source: Some(path.display().to_string()),
    })
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Enroll every image in `dir` into `store`, one report per file.
///
/// Only an unreadable directory fails the run; a file that cannot be read
/// is reported as failed and the batch moves on.
pub async fn run_enrollment(
    store: Arc<dyn GalleryStore>,
    extractor: Arc<dyn EmbeddingExtractor>,
    dir: &Path,
) -> Result<Vec<EnrollmentReport>, ServiceError> {
    let paths = collect_enrollment_paths(dir)?;
    info!("Found {} images in {}", paths.len(), dir.display());

    let bulk = BulkEnrollment::new(extractor, GalleryEnrollment::new(store));
    let mut reports = Vec::with_capacity(paths.len());
    for path in paths {
        let report = match load_enrollment_item(&path).await {
            Ok(item) => bulk.enroll_item(item).await,
            Err(e) => {
                error!("Cannot read {}: {}", path.display(), e);
                EnrollmentReport {
                    name: enrollment_name(&path),
                    status: EnrollmentStatus::Failed(format!("unreadable image: {}", e)),
                }
            }
        };
        reports.push(report);
    }
    Ok(reports)
}

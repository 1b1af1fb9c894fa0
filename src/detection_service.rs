use crate::{
    bounding_box::{Detection, DetectionResult},
    detector::{Detector, DetectorError},
    image_ops::{decode_image, encode_jpeg, AnnotateError, Annotator, DecodeError},
    labels::ClassLabels,
    store::ResultStore,
};
use axum::body::Bytes;
use chrono::Utc;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum DetectionServiceError {
    #[error("Invalid image: {0}")]
    Decode(#[from] DecodeError),
    #[error("Model inference failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("Annotation failed: {0}")]
    Annotate(#[from] AnnotateError),
    #[error("Failed to persist annotated image: {0}")]
    Persist(std::io::Error),
    #[error("Worker task failed: {0}")]
    Task(String),
}

pub struct ProcessedUpload {
    pub result: Arc<DetectionResult>,
    pub annotated_jpeg: Vec<u8>,
}

/// Runs the upload lifecycle: decode, detect, annotate, then commit the
/// annotated file and the result together.
pub struct DetectionService {
    detector: Arc<dyn Detector>,
    labels: Arc<ClassLabels>,
    annotator: Arc<Annotator>,
    store: Arc<dyn ResultStore>,
    output_path: PathBuf,
    // Held while the output file and the store are updated so both always
    // describe the same upload.
    commit_lock: Mutex<()>,
}

impl DetectionService {
    pub fn new(
        detector: Arc<dyn Detector>,
        labels: ClassLabels,
        annotator: Annotator,
        store: Arc<dyn ResultStore>,
        output_path: PathBuf,
    ) -> Self {
        Self {
            detector,
            labels: Arc::new(labels),
            annotator: Arc::new(annotator),
            store,
            output_path,
            commit_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    #[instrument(skip_all, fields(upload_bytes = image_data.len()))]
    pub async fn process_upload(
        &self,
        image_data: Bytes,
    ) -> Result<ProcessedUpload, DetectionServiceError> {
        let detector = self.detector.clone();
        let labels = self.labels.clone();
        let annotator = self.annotator.clone();

        let (result, annotated_jpeg) = tokio::task::spawn_blocking(move || {
            let image = decode_image(&image_data)?;

            let created_at = Utc::now();
            let started = Instant::now();
            let boxes = detector.detect(&image)?;
            let inference_ms = started.elapsed().as_millis() as u64;

            let detections: Vec<Detection> = boxes
                .iter()
                .filter_map(|bbox| bbox.clipped(image.width(), image.height()))
                .map(|bbox| labels.resolve(&bbox))
                .collect();
            if detections.len() < boxes.len() {
                tracing::debug!(
                    "Dropped {} boxes outside the image",
                    boxes.len() - detections.len()
                );
            }
            let annotated_jpeg = encode_jpeg(&annotator.annotate(&image, &detections))?;

            let result = DetectionResult {
                detections,
                created_at,
                inference_ms,
                image_width: image.width(),
                image_height: image.height(),
            };
            Ok::<_, DetectionServiceError>((result, annotated_jpeg))
        })
        .await
        .map_err(|e| DetectionServiceError::Task(e.to_string()))??;

        tracing::debug!(
            "Detected {} objects in {} ms",
            result.detections.len(),
            result.inference_ms
        );
        for (i, detection) in result.detections.iter().enumerate() {
            tracing::debug!(
                "Detection {}: {} ({}), confidence={:.3}, bbox=({:.1}, {:.1}, {:.1}, {:.1})",
                i,
                detection.name,
                detection.class_id,
                detection.confidence,
                detection.bbox.x1,
                detection.bbox.y1,
                detection.bbox.x2,
                detection.bbox.y2
            );
        }

        let result = Arc::new(result);
        {
            let _guard = self.commit_lock.lock().await;
            write_replacing(&self.output_path, &annotated_jpeg)
                .await
                .map_err(DetectionServiceError::Persist)?;
            self.store.replace(result.clone());
        }

        Ok(ProcessedUpload {
            result,
            annotated_jpeg,
        })
    }
}

/// Writes to a sibling temporary file and renames it over `path`.
async fn write_replacing(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);

    let written = match tokio::fs::write(&tmp_path, data).await {
        Ok(()) => tokio::fs::rename(&tmp_path, path).await,
        Err(e) => Err(e),
    };
    if written.is_err() {
        if let Err(e) = tokio::fs::remove_file(&tmp_path).await {
            tracing::debug!("Could not remove {:?}: {}", tmp_path, e);
        }
    }
    written
}

mod nms;
mod ort_detector;

use crate::bounding_box::BoundingBox;
use image::DynamicImage;
use thiserror::Error;

pub use nms::non_max_suppression;
pub use ort_detector::OrtDetector;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("failed to load model: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected model output: {0}")]
    Output(String),
}

/// An object detector built once at startup and shared across requests.
///
/// Implementations are called from blocking worker threads and may block.
pub trait Detector: Send + Sync + 'static {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

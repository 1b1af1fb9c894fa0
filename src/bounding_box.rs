use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Raw detector output in pixel coordinates of the uploaded image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub class_id: usize,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.) * (self.y2 - self.y1).max(0.)
    }

    /// Clips the box to a `width` x `height` image. Returns `None` when
    /// nothing of the box is left inside the image.
    pub fn clipped(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let (width, height) = (width as f32, height as f32);
        let clipped = BoundingBox {
            x1: self.x1.clamp(0., width),
            y1: self.y1.clamp(0., height),
            x2: self.x2.clamp(0., width),
            y2: self.y2.clamp(0., height),
            ..*self
        };

        // NaN coordinates fail both comparisons.
        (clipped.x2 > clipped.x1 && clipped.y2 > clipped.y1).then_some(clipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoxCoords {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub name: String,
    #[serde(rename = "class")]
    pub class_id: usize,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoxCoords,
    #[serde(skip)]
    pub color: [u8; 3],
}

#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub created_at: DateTime<Utc>,
    pub inference_ms: u64,
    pub image_width: u32,
    pub image_height: u32,
}

impl DetectionResult {
    pub fn summary(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for detection in &self.detections {
            *counts.entry(detection.name.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Per-label counts of the latest result, in the "photo-count" event shape.
#[derive(Debug, Serialize)]
pub struct ResultSummary {
    pub datetime: DateTime<Utc>,
    pub event_type: &'static str,
    pub duration: f64,
    pub summary: BTreeMap<String, usize>,
}

impl From<&DetectionResult> for ResultSummary {
    fn from(result: &DetectionResult) -> Self {
        Self {
            datetime: result.created_at,
            event_type: "photo-count",
            duration: result.inference_ms as f64 / 1000.,
            summary: result.summary(),
        }
    }
}

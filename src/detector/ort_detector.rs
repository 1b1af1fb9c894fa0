use super::{non_max_suppression, Detector, DetectorError};
use crate::{
    bounding_box::BoundingBox,
    config::{ModelConfig, Validatable},
};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{s, Array, ArrayViewD, Axis, Ix3, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

const INPUT_SIZE: u32 = 640;
const OUTPUT_NAME: &str = "output0";

fn transform_image(image: &DynamicImage) -> (Array<f32, Ix4>, u32, u32) {
    let (img_width, img_height) = image.dimensions();
    let resized = image
        .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom)
        .to_rgb8();

    let size = INPUT_SIZE as usize;
    let input = Array::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
        resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.
    });

    (input, img_width, img_height)
}

/// Decodes a YOLOv8 `[1, 4 + classes, anchors]` output into boxes scaled to
/// the original image.
fn decode_output(
    output: ArrayViewD<f32>,
    img_width: u32,
    img_height: u32,
    min_probability: f32,
    iou_threshold: f32,
) -> Result<Vec<BoundingBox>, DetectorError> {
    let shape = output.shape().to_vec();
    let output = output
        .into_dimensionality::<Ix3>()
        .ok()
        .filter(|output| output.shape()[0] == 1 && output.shape()[1] > 4)
        .ok_or_else(|| {
            DetectorError::Output(format!(
                "expected [1, 4 + classes, anchors], got {:?}",
                shape
            ))
        })?;

    let scale_x = img_width as f32 / INPUT_SIZE as f32;
    let scale_y = img_height as f32 / INPUT_SIZE as f32;

    let transposed = output.t();
    let rows = transposed.slice(s![.., .., 0]);
    let mut boxes = Vec::new();

    for row in rows.axis_iter(Axis(0)) {
        let best = row
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|accum, item| if item.1 > accum.1 { item } else { accum });
        let Some((class_id, prob)) = best else {
            continue;
        };

        if prob < min_probability {
            continue;
        }

        let xc = row[0usize] * scale_x;
        let yc = row[1usize] * scale_y;
        let w = row[2usize] * scale_x;
        let h = row[3usize] * scale_y;

        boxes.push(BoundingBox {
            class_id,
            confidence: prob,
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
        });
    }

    Ok(non_max_suppression(boxes, iou_threshold))
}

fn load_error(e: impl std::fmt::Display) -> DetectorError {
    DetectorError::ModelLoad(e.to_string())
}

/// ONNX Runtime YOLOv8 detector backed by a round-robin pool of sessions.
#[derive(Clone)]
pub struct OrtDetector {
    sessions: Arc<Vec<Mutex<Session>>>,
    counter: Arc<AtomicUsize>,
    min_probability: f32,
    iou_threshold: f32,
}

impl OrtDetector {
    pub fn new(model_config: &ModelConfig) -> Result<Self, DetectorError> {
        let model_path = model_config.get_path();
        let num_instances = model_config.num_instances.max(1);

        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()
                    .map_err(load_error)?
                    .with_optimization_level(GraphOptimizationLevel::Level3)
                    .map_err(load_error)?
                    .commit_from_file(&model_path)
                    .map_err(load_error)?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, DetectorError>>()?;

        tracing::info!("Created {} ONNX sessions from {:?}", num_instances, model_path);

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            min_probability: model_config.min_probability,
            iou_threshold: model_config.iou_threshold,
        })
    }

    fn run_inference(
        &self,
        input: &Array<f32, Ix4>,
    ) -> Result<ndarray::ArrayD<f32>, DetectorError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| DetectorError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectorError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let (shape, data) = outputs[OUTPUT_NAME]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::Output(format!("failed to extract tensor: {}", e)))?;

        let array = ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| DetectorError::Output(format!("invalid tensor shape: {}", e)))?;

        Ok(array)
    }
}

impl Detector for OrtDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, img_width, img_height) = transform_image(image);
        let output = self.run_inference(&input)?;

        decode_output(
            output.view(),
            img_width,
            img_height,
            self.min_probability,
            self.iou_threshold,
        )
    }
}

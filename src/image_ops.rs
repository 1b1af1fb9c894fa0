use crate::{bounding_box::Detection, config::AnnotationConfig};
use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use std::io::Cursor;
use thiserror::Error;

const LABEL_PADDING: i32 = 2;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("upload is empty")]
    Empty,
    #[error("failed to read image data: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("failed to load font {path}: {reason}")]
    Font { path: String, reason: String },
    #[error("failed to encode annotated image: {0}")]
    Encode(#[from] image::ImageError),
}

pub fn decode_image(image_data: &[u8]) -> Result<DynamicImage, DecodeError> {
    if image_data.is_empty() {
        return Err(DecodeError::Empty);
    }

    let image = image::ImageReader::new(Cursor::new(image_data))
        .with_guessed_format()?
        .decode()?;

    Ok(image)
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, AnnotateError> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Jpeg)?;
    Ok(buffer.into_inner())
}

/// Draws detection boxes and, when a font is available, their labels.
pub struct Annotator {
    font: Option<FontArc>,
    scale: PxScale,
    line_thickness: u32,
}

impl Annotator {
    pub fn new(config: &AnnotationConfig) -> Result<Self, AnnotateError> {
        let font = match &config.font_path {
            Some(path) => {
                let font_error = |reason: String| AnnotateError::Font {
                    path: path.display().to_string(),
                    reason,
                };
                let data = std::fs::read(path).map_err(|e| font_error(e.to_string()))?;
                Some(FontArc::try_from_vec(data).map_err(|e| font_error(e.to_string()))?)
            }
            None => {
                tracing::warn!("No annotation font configured, labels will not be drawn");
                None
            }
        };

        Ok(Self {
            font,
            scale: PxScale::from(config.font_size),
            line_thickness: config.line_thickness.max(1),
        })
    }

    pub fn annotate(&self, image: &DynamicImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = image.to_rgb8();
        for detection in detections {
            self.draw_detection(&mut canvas, detection);
        }
        canvas
    }

    fn draw_detection(&self, canvas: &mut RgbImage, detection: &Detection) {
        let (width, height) = (canvas.width() as i32, canvas.height() as i32);
        if width == 0 || height == 0 {
            return;
        }

        // Boxes that round to nothing are still drawn one pixel wide.
        let x1 = (detection.bbox.x1.round() as i32).clamp(0, width - 1);
        let y1 = (detection.bbox.y1.round() as i32).clamp(0, height - 1);
        let x2 = (detection.bbox.x2.round() as i32).clamp(x1, width - 1);
        let y2 = (detection.bbox.y2.round() as i32).clamp(y1, height - 1);

        let color = Rgb(detection.color);
        let (box_width, box_height) = (x2 - x1 + 1, y2 - y1 + 1);

        for inset in 0..self.line_thickness as i32 {
            let (w, h) = (box_width - 2 * inset, box_height - 2 * inset);
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(x1 + inset, y1 + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(canvas, rect, color);
        }

        let Some(font) = &self.font else {
            return;
        };

        let label = format!("{}: {:.2}", detection.name, detection.confidence);
        let (text_width, _) = text_size(self.scale, font, &label);
        // Full line height, so descenders stay on the label background.
        let line_height = font.as_scaled(self.scale).height().ceil() as i32;
        let label_height = line_height + 2 * LABEL_PADDING;
        let label_y = (y1 - label_height).max(0);

        let background = Rect::at(x1, label_y).of_size(
            text_width + 2 * LABEL_PADDING as u32,
            label_height as u32,
        );
        draw_filled_rect_mut(canvas, background, color);
        draw_text_mut(
            canvas,
            LABEL_TEXT_COLOR,
            x1 + LABEL_PADDING,
            label_y + LABEL_PADDING,
            self.scale,
            font,
            &label,
        );
    }
}

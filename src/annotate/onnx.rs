use super::detector::{non_maximum_suppression, PersonDetector, ScoredBox};
use anyhow::{bail, Context, Result};
use image::{imageops, Rgb, RgbImage};
use ndarray::{Array4, ArrayViewD};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

/// COCO class index of "person"
const PERSON_CLASS: usize = 0;
const PAD_VALUE: u8 = 114;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Minimum person score kept before suppression
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Side of the square network input
    pub input_size: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            input_size: 640,
        }
    }
}

/// Placement of the scaled image inside the square network input
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
}

/// YOLOv8 detector exported to ONNX, reporting only people
pub struct OnnxPersonDetector {
    session: Session,
    config: DetectorConfig,
}

impl OnnxPersonDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, config: DetectorConfig) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading person detector from {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!("Person detector loaded successfully");

        Ok(Self { session, config })
    }
}

impl PersonDetector for OnnxPersonDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<ScoredBox>> {
        let _span = tracing::debug_span!("person_detect").entered();

        let (canvas, letterbox) = letterbox(image, self.config.input_size);
        let input = Tensor::from_array(to_nchw(&canvas)).context("Failed to build input tensor")?;

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![input])
            .context("Failed to run inference")?;
        drop(_infer_span);

        let predictions = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to read detector output")?;
        let candidates = decode_predictions(
            predictions,
            letterbox,
            image.dimensions(),
            self.config.confidence_threshold,
        )?;

        let people = non_maximum_suppression(candidates, self.config.iou_threshold);
        tracing::debug!("Detected {} people", people.len());
        Ok(people)
    }
}

/// Aspect-preserving resize onto a gray square canvas, centered
fn letterbox(image: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
    let (width, height) = image.dimensions();
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_width = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_height = ((height as f32 * scale).round() as u32).clamp(1, size);

    let resized = imageops::resize(image, new_width, new_height, imageops::FilterType::Triangle);
    let pad_x = (size - new_width) / 2;
    let pad_y = (size - new_height) / 2;

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    (canvas, Letterbox { scale, pad_x, pad_y })
}

/// RGB image to a [1, 3, H, W] tensor scaled to [0, 1]
fn to_nchw(image: &RgbImage) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Person boxes from a `[1, 4 + classes, anchors]` output, mapped back to image pixels
fn decode_predictions(
    predictions: ArrayViewD<'_, f32>,
    letterbox: Letterbox,
    (width, height): (u32, u32),
    confidence_threshold: f32,
) -> Result<Vec<ScoredBox>> {
    let shape = predictions.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 + PERSON_CLASS {
        bail!("Unexpected detector output shape {:?}", shape);
    }

    let mut boxes = Vec::new();
    for anchor in 0..shape[2] {
        let score = predictions[[0, 4 + PERSON_CLASS, anchor]];
        if score < confidence_threshold {
            continue;
        }

        let cx = (predictions[[0, 0, anchor]] - letterbox.pad_x as f32) / letterbox.scale;
        let cy = (predictions[[0, 1, anchor]] - letterbox.pad_y as f32) / letterbox.scale;
        let w = predictions[[0, 2, anchor]] / letterbox.scale;
        let h = predictions[[0, 3, anchor]] / letterbox.scale;

        boxes.push(ScoredBox::new(
            (cx - w / 2.0).clamp(0.0, width as f32),
            (cy - h / 2.0).clamp(0.0, height as f32),
            (cx + w / 2.0).clamp(0.0, width as f32),
            (cy + h / 2.0).clamp(0.0, height as f32),
            score,
        ));
    }
    Ok(boxes)
}

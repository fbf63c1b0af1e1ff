//! One-shot person annotation of sensor snapshots
//!
//! A sensor document carries a base64-encoded still under
//! `sensorData.videoData.data`. The image is run through a [`PersonDetector`],
//! every person is boxed and captioned, and the detection summary is written
//! back into the document.

mod detector;
#[cfg(feature = "onnx")]
mod onnx;

pub use detector::{non_maximum_suppression, PersonDetector, ScoredBox};
#[cfg(feature = "onnx")]
pub use onnx::{DetectorConfig, OnnxPersonDetector};

use crate::output::overlay::{draw_labeled_box, GREEN};
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::RgbImage;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;

/// Placeholder some sensors send instead of image data
pub const NO_VIDEO_PLACEHOLDER: &str = "No video captured";
pub const POACHING_ALERT: &str = "Poaching alert";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
}

#[derive(Debug, Clone)]
pub struct AnnotationResult {
    pub annotated_image: RgbImage,
    pub detection_count: usize,
    pub detections: Vec<DetectionRecord>,
}

/// Decode the snapshot of a `sensorData` object and annotate the people in it
///
/// Returns `Ok(None)` when the object holds no usable image. Detector failures
/// are errors.
pub fn process_sensor_data(sensor_data: &Value, detector: &mut dyn PersonDetector) -> Result<Option<AnnotationResult>> {
    let video = &sensor_data["videoData"];
    if !video["available"].as_bool().unwrap_or(false) {
        tracing::info!("No video data available");
        return Ok(None);
    }

    let encoded = video["data"].as_str().unwrap_or("");
    if encoded.is_empty() || encoded == NO_VIDEO_PLACEHOLDER {
        tracing::info!("No valid video data found");
        return Ok(None);
    }

    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = match STANDARD.decode(compact.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Error decoding base64: {}", e);
            return Ok(None);
        }
    };

    let image = match image::load_from_memory(&bytes) {
        Ok(image) => image.to_rgb8(),
        Err(e) => {
            tracing::warn!("Failed to decode image: {}", e);
            return Ok(None);
        }
    };

    let people = detector.detect(&image).context("Person detection failed")?;
    tracing::info!("Detected {} people in {}x{} snapshot", people.len(), image.width(), image.height());

    let mut annotated_image = image;
    for person in &people {
        let (x, y, w, h) = pixel_rect(person, annotated_image.dimensions());
        let caption = format!("person {:.2}", person.score);
        draw_labeled_box(&mut annotated_image, x, y, w, h, &caption, GREEN);
    }

    let detections = people
        .iter()
        .map(|p| DetectionRecord {
            confidence: p.score,
            bbox: p.xyxy(),
        })
        .collect();

    Ok(Some(AnnotationResult {
        annotated_image,
        detection_count: people.len(),
        detections,
    }))
}

/// Annotate the snapshot in a full sensor document and record the results in it
///
/// When there is an image, the annotated copy is written to `output_path`,
/// `sensorData.detectionResults` is filled in and `sensorData.alertType` is
/// raised to the poaching alert if anyone was found. Otherwise the document is
/// returned unchanged.
pub fn process_document<P: AsRef<Path>>(
    mut document: Value,
    detector: &mut dyn PersonDetector,
    output_path: P,
) -> Result<Value> {
    let Some(result) = process_sensor_data(&document["sensorData"], detector)? else {
        return Ok(document);
    };

    let output_path = output_path.as_ref();
    result
        .annotated_image
        .save(output_path)
        .with_context(|| format!("Failed to write annotated image to {}", output_path.display()))?;
    tracing::info!("Annotated image written to {}", output_path.display());

    let sensor_data = &mut document["sensorData"];
    sensor_data["detectionResults"] = json!({
        "peopleDetected": result.detection_count,
        "detections": result.detections,
    });
    if result.detection_count > 0 {
        sensor_data["alertType"] = Value::from(POACHING_ALERT);
    }

    Ok(document)
}

/// Integer (x, y, width, height) of a box, clipped to the image
fn pixel_rect(b: &ScoredBox, (width, height): (u32, u32)) -> (u32, u32, u32, u32) {
    let clip = |v: f32, max: u32| (v.round().max(0.0) as u32).min(max);
    let x1 = clip(b.x1, width);
    let y1 = clip(b.y1, height);
    let x2 = clip(b.x2, width).max(x1);
    let y2 = clip(b.y2, height).max(y1);
    (x1, y1, x2 - x1, y2 - y1)
}

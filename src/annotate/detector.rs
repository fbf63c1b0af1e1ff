use anyhow::Result;
use image::RgbImage;
use serde::Serialize;

/// Axis-aligned box in image pixels with its detector score
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
}

impl ScoredBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Self {
        Self { x1, y1, x2, y2, score }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union; 0 when the boxes are disjoint or degenerate
    pub fn iou(&self, other: &Self) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// `[x1, y1, x2, y2]`
    pub fn xyxy(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Trait for models that locate people in a still image
pub trait PersonDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<ScoredBox>>;
}

impl<T: PersonDetector + ?Sized> PersonDetector for Box<T> {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<ScoredBox>> {
        (**self).detect(image)
    }
}

/// Greedy non-maximum suppression, highest score first
pub fn non_maximum_suppression(mut boxes: Vec<ScoredBox>, iou_threshold: f32) -> Vec<ScoredBox> {
    boxes.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<ScoredBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|k| k.iou(&candidate) < iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

use super::types::{ForegroundMask, FOREGROUND};
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Foreground pixels in the blob
    pub area: u32,
}

impl BoundingBox {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

#[derive(Debug, Clone)]
pub struct ProposerConfig {
    /// Blobs smaller than this many pixels are treated as noise
    pub min_area: u32,
}

impl Default for ProposerConfig {
    fn default() -> Self {
        Self { min_area: 500 }
    }
}

/// Turns a foreground mask into one box per external connected blob
///
/// Foreground blobs are 8-connected and background is 4-connected. A blob that
/// sits inside a hole of another blob is internal and produces no box.
/// Overlapping boxes are returned as they are, never merged.
pub struct RegionProposer {
    config: ProposerConfig,
}

impl RegionProposer {
    pub fn new(config: ProposerConfig) -> Self {
        Self { config }
    }

    pub fn propose(&self, mask: &ForegroundMask) -> Vec<BoundingBox> {
        let _span = tracing::debug_span!("propose_regions").entered();

        let width = mask.width() as usize;
        let height = mask.height() as usize;
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let foreground: Vec<bool> = mask.as_raw().iter().map(|v| *v == FOREGROUND).collect();
        let outside = outer_background(&foreground, width, height);

        let mut visited = vec![false; width * height];
        let mut queue = VecDeque::new();
        let mut boxes = Vec::new();

        for start in 0..width * height {
            if !foreground[start] || visited[start] {
                continue;
            }

            visited[start] = true;
            queue.push_back(start);

            let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
            let (mut max_x, mut max_y) = (0usize, 0usize);
            let mut area = 0u32;
            let mut external = false;

            while let Some(idx) = queue.pop_front() {
                let (x, y) = (idx % width, idx / width);
                area += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);

                if !external {
                    external = x == 0
                        || y == 0
                        || x + 1 == width
                        || y + 1 == height
                        || [idx - 1, idx + 1, idx - width, idx + width]
                            .iter()
                            .any(|&n| outside[n]);
                }

                for (nx, ny) in neighbours8(x, y, width, height) {
                    let n = ny * width + nx;
                    if foreground[n] && !visited[n] {
                        visited[n] = true;
                        queue.push_back(n);
                    }
                }
            }

            if !external {
                tracing::trace!("Ignoring nested blob at ({}, {})", min_x, min_y);
                continue;
            }
            if area < self.config.min_area {
                continue;
            }

            boxes.push(BoundingBox {
                x: min_x as u32,
                y: min_y as u32,
                width: (max_x - min_x + 1) as u32,
                height: (max_y - min_y + 1) as u32,
                area,
            });
        }

        tracing::debug!("Proposed {} regions", boxes.len());
        boxes
    }
}

/// Background pixels 4-connected to the frame border
fn outer_background(foreground: &[bool], width: usize, height: usize) -> Vec<bool> {
    let mut outside = vec![false; width * height];
    let mut queue = VecDeque::new();

    let border = (0..width)
        .flat_map(|x| [(x, 0), (x, height - 1)])
        .chain((0..height).flat_map(|y| [(0, y), (width - 1, y)]));
    for (x, y) in border {
        let idx = y * width + x;
        if !foreground[idx] && !outside[idx] {
            outside[idx] = true;
            queue.push_back(idx);
        }
    }

    while let Some(idx) = queue.pop_front() {
        let (x, y) = (idx % width, idx / width);
        let mut visit = |n: usize| {
            if !foreground[n] && !outside[n] {
                outside[n] = true;
                queue.push_back(n);
            }
        };
        if x > 0 {
            visit(idx - 1);
        }
        if x + 1 < width {
            visit(idx + 1);
        }
        if y > 0 {
            visit(idx - width);
        }
        if y + 1 < height {
            visit(idx + width);
        }
    }

    outside
}

fn neighbours8(x: usize, y: usize, width: usize, height: usize) -> impl Iterator<Item = (usize, usize)> {
    let x0 = x.saturating_sub(1);
    let y0 = y.saturating_sub(1);
    let x1 = (x + 1).min(width - 1);
    let y1 = (y + 1).min(height - 1);
    (y0..=y1)
        .flat_map(move |ny| (x0..=x1).map(move |nx| (nx, ny)))
        .filter(move |&(nx, ny)| nx != x || ny != y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::types::SHADOW;
    use image::Luma;

    fn fill(mask: &mut ForegroundMask, x: u32, y: u32, w: u32, h: u32) {
        for yy in y..y + h {
            for xx in x..x + w {
                mask.put_pixel(xx, yy, Luma([FOREGROUND]));
            }
        }
    }

    fn proposer() -> RegionProposer {
        RegionProposer::new(ProposerConfig::default())
    }

    #[test]
    fn single_large_blob_gives_one_box() {
        let mut mask = ForegroundMask::new(100, 100);
        fill(&mut mask, 10, 20, 40, 25);

        let boxes = proposer().propose(&mask);

        assert_eq!(
            boxes,
            vec![BoundingBox {
                x: 10,
                y: 20,
                width: 40,
                height: 25,
                area: 1000
            }]
        );
    }

    #[test]
    fn small_blob_is_discarded() {
        let mut mask = ForegroundMask::new(100, 100);
        fill(&mut mask, 50, 50, 10, 10);

        assert!(proposer().propose(&mask).is_empty());
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut mask = ForegroundMask::new(100, 100);
        fill(&mut mask, 0, 0, 25, 20);

        assert_eq!(proposer().propose(&mask).len(), 1);
    }

    #[test]
    fn diagonal_pixels_join_one_blob() {
        let mut mask = ForegroundMask::new(20, 20);
        fill(&mut mask, 2, 2, 3, 3);
        fill(&mut mask, 5, 5, 3, 3);

        let boxes = RegionProposer::new(ProposerConfig { min_area: 1 }).propose(&mask);
        assert_eq!(boxes.len(), 1);
        assert_eq!((boxes[0].width, boxes[0].height, boxes[0].area), (6, 6, 18));
    }

    #[test]
    fn overlapping_boxes_are_not_merged() {
        let mut mask = ForegroundMask::new(120, 120);
        // Two L-shaped blobs whose bounding boxes overlap but whose pixels never touch
        fill(&mut mask, 10, 10, 60, 10);
        fill(&mut mask, 10, 10, 10, 60);
        fill(&mut mask, 30, 40, 60, 10);
        fill(&mut mask, 80, 40, 10, 60);

        let boxes = proposer().propose(&mask);

        assert_eq!(boxes.len(), 2);
        let (a, b) = (boxes[0], boxes[1]);
        assert!(a.contains(b.x, b.y));
    }

    #[test]
    fn nested_blob_is_ignored() {
        let mut mask = ForegroundMask::new(200, 200);
        // Ring of width 5 around a hole, with a solid blob inside the hole
        fill(&mut mask, 10, 10, 150, 5);
        fill(&mut mask, 10, 155, 150, 5);
        fill(&mut mask, 10, 10, 5, 150);
        fill(&mut mask, 155, 10, 5, 150);
        fill(&mut mask, 50, 50, 40, 40);

        let boxes = proposer().propose(&mask);

        assert_eq!(boxes.len(), 1);
        assert_eq!((boxes[0].x, boxes[0].y, boxes[0].width, boxes[0].height), (10, 10, 150, 150));
    }

    #[test]
    fn shadow_pixels_are_not_foreground() {
        let mut mask = ForegroundMask::new(60, 60);
        for y in 0..40 {
            for x in 0..40 {
                mask.put_pixel(x, y, Luma([SHADOW]));
            }
        }
        assert!(proposer().propose(&mask).is_empty());
    }

    #[test]
    fn blob_touching_frame_edge_is_external() {
        let mask = ForegroundMask::from_pixel(30, 30, Luma([FOREGROUND]));
        let boxes = proposer().propose(&mask);
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].area, 900);
    }
}

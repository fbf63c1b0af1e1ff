//! Histogram of Oriented Gradients
//!
//! Turns a grayscale region into a fixed-length vector describing its local
//! gradient structure. The region is first brought onto a canonical window so
//! that the cell and block tiling, and therefore the descriptor length, never
//! changes between training and inference.

use super::preprocess::{to_gray, Preprocessor};
use crate::error::{Result, WildwatchError};
use image::{GrayImage, RgbImage};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Fixed-length feature vector for one region
pub type Descriptor = Array1<f64>;

const L2_HYS_CLIP: f64 = 0.2;
const NORM_EPS: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HogParams {
    pub window_width: u32,
    pub window_height: u32,
    /// Cell edge in pixels
    pub cell_size: u32,
    /// Block edge in cells
    pub block_size: u32,
    pub n_bins: u32,
}

impl Default for HogParams {
    fn default() -> Self {
        Self {
            window_width: 64,
            window_height: 128,
            cell_size: 8,
            block_size: 2,
            n_bins: 9,
        }
    }
}

impl HogParams {
    fn cells(&self) -> (usize, usize) {
        (
            (self.window_width / self.cell_size) as usize,
            (self.window_height / self.cell_size) as usize,
        )
    }

    fn blocks(&self) -> (usize, usize) {
        let (cells_x, cells_y) = self.cells();
        let block = self.block_size as usize;
        (cells_x + 1 - block, cells_y + 1 - block)
    }

    /// Number of values every descriptor built with these parameters has
    pub fn descriptor_len(&self) -> usize {
        let (blocks_x, blocks_y) = self.blocks();
        let block = self.block_size as usize;
        blocks_x * blocks_y * block * block * self.n_bins as usize
    }

    fn validate(&self) -> Result<()> {
        if self.cell_size == 0 || self.block_size == 0 || self.n_bins == 0 {
            return Err(WildwatchError::config(
                "HOG cell size, block size and bin count must be non-zero",
            ));
        }
        if self.window_width % self.cell_size != 0 || self.window_height % self.cell_size != 0 {
            return Err(WildwatchError::config(format!(
                "HOG window {}x{} is not a whole number of {}px cells",
                self.window_width, self.window_height, self.cell_size
            )));
        }
        let (cells_x, cells_y) = self.cells();
        if cells_x < self.block_size as usize || cells_y < self.block_size as usize {
            return Err(WildwatchError::config(format!(
                "HOG window has {cells_x}x{cells_y} cells, fewer than one {0}x{0} block",
                self.block_size
            )));
        }
        Ok(())
    }
}

pub struct HogExtractor {
    params: HogParams,
    preprocessor: Preprocessor,
}

impl HogExtractor {
    pub fn new(params: HogParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            preprocessor: Preprocessor::new(params.window_width, params.window_height),
        })
    }

    pub fn params(&self) -> &HogParams {
        &self.params
    }

    pub fn descriptor_len(&self) -> usize {
        self.params.descriptor_len()
    }

    pub fn extract_color(&self, region: &RgbImage) -> Result<Descriptor> {
        self.extract(&to_gray(region))
    }

    /// Compute the descriptor of a grayscale region of any non-empty size
    pub fn extract(&self, region: &GrayImage) -> Result<Descriptor> {
        let _span = tracing::debug_span!("hog_extract").entered();

        if region.width() == 0 || region.height() == 0 {
            return Err(WildwatchError::config("cannot describe an empty region"));
        }

        let window = self.preprocessor.preprocess(region);
        let histograms = self.cell_histograms(&window);
        Ok(self.normalize_blocks(&histograms))
    }

    /// Mean gradient magnitude per orientation bin for every cell, row-major
    fn cell_histograms(&self, window: &GrayImage) -> Vec<f64> {
        let width = window.width() as usize;
        let height = window.height() as usize;
        let cell = self.params.cell_size as usize;
        let n_bins = self.params.n_bins as usize;
        let (cells_x, cells_y) = self.params.cells();
        let bin_width = 180.0 / n_bins as f64;

        let raw = window.as_raw();
        let px = |x: usize, y: usize| raw[y * width + x] as f64;

        let mut histograms = vec![0.0f64; cells_x * cells_y * n_bins];

        for y in 0..cells_y * cell {
            for x in 0..cells_x * cell {
                // Central differences, zero along the window border
                let g_col = if x == 0 || x + 1 == width {
                    0.0
                } else {
                    px(x + 1, y) - px(x - 1, y)
                };
                let g_row = if y == 0 || y + 1 == height {
                    0.0
                } else {
                    px(x, y + 1) - px(x, y - 1)
                };

                let magnitude = g_row.hypot(g_col);
                if magnitude == 0.0 {
                    continue;
                }

                let orientation = g_row.atan2(g_col).to_degrees().rem_euclid(180.0);
                let bin = ((orientation / bin_width) as usize).min(n_bins - 1);

                let cell_idx = (y / cell) * cells_x + x / cell;
                histograms[cell_idx * n_bins + bin] += magnitude;
            }
        }

        let cell_area = (cell * cell) as f64;
        for value in histograms.iter_mut() {
            *value /= cell_area;
        }

        histograms
    }

    /// Overlapping blocks of cells, each L2-Hys normalized, concatenated
    fn normalize_blocks(&self, histograms: &[f64]) -> Descriptor {
        let n_bins = self.params.n_bins as usize;
        let block = self.params.block_size as usize;
        let (cells_x, _) = self.params.cells();
        let (blocks_x, blocks_y) = self.params.blocks();
        let block_dim = block * block * n_bins;

        let mut descriptor = Vec::with_capacity(self.params.descriptor_len());
        let mut block_vec = vec![0.0f64; block_dim];

        for by in 0..blocks_y {
            for bx in 0..blocks_x {
                for j in 0..block {
                    for i in 0..block {
                        let cell_base = ((by + j) * cells_x + bx + i) * n_bins;
                        let out_base = (j * block + i) * n_bins;
                        block_vec[out_base..out_base + n_bins]
                            .copy_from_slice(&histograms[cell_base..cell_base + n_bins]);
                    }
                }

                l2_hys(&mut block_vec);
                descriptor.extend_from_slice(&block_vec);
            }
        }

        Array1::from_vec(descriptor)
    }
}

fn l2_hys(block: &mut [f64]) {
    let norm = (block.iter().map(|v| v * v).sum::<f64>() + NORM_EPS * NORM_EPS).sqrt();
    for v in block.iter_mut() {
        *v = (*v / norm).min(L2_HYS_CLIP);
    }
    let norm = (block.iter().map(|v| v * v).sum::<f64>() + NORM_EPS * NORM_EPS).sqrt();
    for v in block.iter_mut() {
        *v /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn extractor() -> HogExtractor {
        HogExtractor::new(HogParams::default()).unwrap()
    }

    fn vertical_edge(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Luma([20])
            } else {
                Luma([220])
            }
        })
    }

    #[test]
    fn default_descriptor_length() {
        assert_eq!(HogParams::default().descriptor_len(), 3780);
        assert_eq!(extractor().descriptor_len(), 3780);
    }

    #[test]
    fn length_is_independent_of_region_size() {
        let hog = extractor();
        for (w, h) in [(10, 10), (64, 128), (300, 41), (1, 1)] {
            let region = GrayImage::from_fn(w, h, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]));
            assert_eq!(hog.extract(&region).unwrap().len(), 3780);
        }
    }

    #[test]
    fn extraction_is_deterministic() {
        let hog = extractor();
        let region = GrayImage::from_fn(64, 128, |x, y| Luma([((x * x + 3 * y) % 251) as u8]));

        let a = hog.extract(&region).unwrap();
        let b = hog.extract(&region).unwrap();

        assert!(a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));
    }

    #[test]
    fn flat_region_has_no_gradient_energy() {
        let descriptor = extractor()
            .extract(&GrayImage::from_pixel(64, 128, Luma([128])))
            .unwrap();
        assert!(descriptor.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn vertical_edge_votes_into_horizontal_gradient_bin() {
        let hog = extractor();
        let descriptor = hog.extract(&vertical_edge(64, 128)).unwrap();

        // Block (0, 3) straddles the edge at x = 32; its first cell is cell (3, 0).
        let block_dim = 36;
        let block = &descriptor.as_slice().unwrap()[3 * block_dim..4 * block_dim];
        let cell = &block[0..9];
        let strongest = cell
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();

        assert_eq!(strongest, 0);
        assert!(descriptor.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn color_regions_are_converted_first() {
        let hog = extractor();
        let gray = vertical_edge(32, 64);
        let color = RgbImage::from_fn(32, 64, |x, y| {
            let v = gray.get_pixel(x, y)[0];
            image::Rgb([v, v, v])
        });

        assert_eq!(hog.extract_color(&color).unwrap(), hog.extract(&gray).unwrap());
    }

    #[test]
    fn rejects_invalid_tiling() {
        let params = HogParams {
            window_width: 60,
            ..HogParams::default()
        };
        assert!(matches!(
            HogExtractor::new(params),
            Err(WildwatchError::Configuration(_))
        ));

        let params = HogParams {
            window_width: 8,
            window_height: 8,
            ..HogParams::default()
        };
        assert!(HogExtractor::new(params).is_err());
    }

    #[test]
    fn rejects_empty_region() {
        assert!(extractor().extract(&GrayImage::new(0, 4)).is_err());
    }
}

use image::{imageops, GrayImage, RgbImage};

/// Brings regions of arbitrary size onto the canonical descriptor window
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    /// Resize a grayscale region to the target window
    ///
    /// Bilinear interpolation keeps the output deterministic for a given input,
    /// which the descriptor relies on.
    pub fn preprocess(&self, region: &GrayImage) -> GrayImage {
        let _span = tracing::debug_span!("preprocess").entered();

        if region.dimensions() == (self.target_width, self.target_height) {
            region.clone()
        } else {
            imageops::resize(
                region,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            )
        }
    }
}

/// Luma conversion used everywhere a color frame enters the grayscale pipeline
pub fn to_gray(frame: &RgbImage) -> GrayImage {
    imageops::grayscale(frame)
}

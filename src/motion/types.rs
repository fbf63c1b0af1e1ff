use crate::error::Result;
use image::GrayImage;

/// Per-pixel marker of "differs from learned background", same size as the frame
pub type ForegroundMask = GrayImage;

pub const FOREGROUND: u8 = 255;
pub const SHADOW: u8 = 127;
pub const BACKGROUND: u8 = 0;

/// Trait for adaptive background models
/// Allows swapping the mixture model for other subtractors without touching the loop
pub trait BackgroundModel {
    /// Fold a grayscale frame into the model and return its foreground mask
    ///
    /// This is the only operation that mutates the model. A frame whose size
    /// differs from the frames seen so far is rejected; recovering from a
    /// resolution change means building a new model.
    fn update(&mut self, frame: &GrayImage) -> Result<ForegroundMask>;

    /// True while the model has seen fewer frames than its history length
    ///
    /// Masks produced during warm-up are unreliable but are still returned.
    fn is_warming_up(&self) -> bool {
        false
    }
}

mod gif;
mod sequence;
#[cfg(feature = "camera")]
mod v4l_capture;

pub use gif::GifSource;
pub use sequence::ImageSequence;
#[cfg(feature = "camera")]
pub use v4l_capture::WebcamCapture;

use anyhow::Result;
use image::RgbImage;

/// Trait for sources of color frames
pub trait FrameSource {
    /// Next frame in sequence order; `None` once the stream has ended
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        (**self).next_frame()
    }
}

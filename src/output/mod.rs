mod directory;
#[cfg(feature = "loopback")]
mod loopback;
pub mod overlay;

pub use directory::{DirectorySink, NullSink};
#[cfg(feature = "loopback")]
pub use loopback::V4L2Output;

use anyhow::Result;
use image::RgbImage;

/// Trait for destinations of annotated frames
pub trait OutputSink {
    /// Write a frame to the output; the frame itself is never modified
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;
}

impl<T: OutputSink + ?Sized> OutputSink for Box<T> {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        (**self).write_frame(frame)
    }
}

use super::FrameSource;
use anyhow::{Context, Result};
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, Frames, RgbImage};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Frames of an animated GIF, decoded lazily
pub struct GifSource {
    frames: Frames<'static>,
}

impl GifSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open GIF {}", path.display()))?;
        let decoder = GifDecoder::new(BufReader::new(file))
            .with_context(|| format!("Failed to read GIF header of {}", path.display()))?;

        tracing::info!("Streaming frames from {}", path.display());

        Ok(Self {
            frames: decoder.into_frames(),
        })
    }
}

impl FrameSource for GifSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        match self.frames.next() {
            None => Ok(None),
            Some(frame) => {
                let frame = frame.context("Failed to decode GIF frame")?;
                Ok(Some(DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame, Rgba, RgbaImage};

    #[test]
    fn yields_every_frame_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.gif");
        {
            let file = File::create(&path).unwrap();
            let mut encoder = GifEncoder::new(file);
            for shade in [0u8, 255] {
                let image = RgbaImage::from_pixel(6, 4, Rgba([shade, shade, shade, 255]));
                encoder
                    .encode_frame(Frame::from_parts(image, 0, 0, Delay::from_numer_denom_ms(40, 1)))
                    .unwrap();
            }
        }

        let mut source = GifSource::open(&path).unwrap();
        let first = source.next_frame().unwrap().unwrap();
        let second = source.next_frame().unwrap().unwrap();

        assert_eq!(first.dimensions(), (6, 4));
        assert!(second.get_pixel(0, 0)[0] > first.get_pixel(0, 0)[0]);
        assert!(source.next_frame().unwrap().is_none());
    }
}

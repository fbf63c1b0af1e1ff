use super::OutputSink;
use anyhow::{Context, Result};
use image::RgbImage;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// Annotated frames published on a v4l2loopback device for live viewing
pub struct V4L2Output {
    file: File,
    width: u32,
    height: u32,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        // Negotiate YUYV at the requested size before streaming raw frames
        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2 device at {}", path.display()))?;
        let requested = Format::new(width, height, FourCC::new(b"YUYV"));
        let format = Output::set_format(&device, &requested).context("Failed to set output format")?;
        if (format.width, format.height) != (width, height) {
            tracing::warn!(
                "Loopback device accepted {}x{} instead of {}x{}",
                format.width,
                format.height,
                width,
                height
            );
        }

        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        Ok(Self {
            file,
            width: format.width,
            height: format.height,
        })
    }

    /// Pack RGB pixels pairwise into YUYV (4:2:2)
    fn rgb_to_yuyv(rgb_image: &RgbImage) -> Vec<u8> {
        let (width, height) = rgb_image.dimensions();
        let mut yuyv = Vec::with_capacity((width * height * 2) as usize);

        for y in 0..height {
            for x in (0..width).step_by(2) {
                let left = rgb_image.get_pixel(x, y);
                let right = if x + 1 < width {
                    rgb_image.get_pixel(x + 1, y)
                } else {
                    left
                };

                let (y0, u0, v0) = rgb_to_yuv(left[0], left[1], left[2]);
                let (y1, u1, v1) = rgb_to_yuv(right[0], right[1], right[2]);

                yuyv.extend_from_slice(&[
                    y0,
                    ((u0 as u16 + u1 as u16) / 2) as u8,
                    y1,
                    ((v0 as u16 + v1 as u16) / 2) as u8,
                ]);
            }
        }

        yuyv
    }
}

/// Full-range BT.601 in 8-bit fixed point
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);

    let y = (77 * r + 150 * g + 29 * b) >> 8;
    let u = ((-43 * r - 85 * g + 128 * b) >> 8) + 128;
    let v = ((128 * r - 107 * g - 21 * b) >> 8) + 128;

    (y.clamp(0, 255) as u8, u.clamp(0, 255) as u8, v.clamp(0, 255) as u8)
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let resized;
        let frame = if frame.dimensions() != (self.width, self.height) {
            resized = image::imageops::resize(
                frame,
                self.width,
                self.height,
                image::imageops::FilterType::Triangle,
            );
            &resized
        } else {
            frame
        };

        self.file
            .write_all(&Self::rgb_to_yuyv(frame))
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }
}

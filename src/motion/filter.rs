use crate::error::{Result, WildwatchError};
use image::GrayImage;

/// Median filter with a square odd kernel and replicated borders
///
/// Removes isolated speckles from a foreground mask while keeping the edges of
/// solid blobs in place.
pub fn median_blur(mask: &GrayImage, kernel_size: u32) -> Result<GrayImage> {
    let _span = tracing::debug_span!("median_blur").entered();

    if kernel_size == 0 || kernel_size % 2 == 0 {
        return Err(WildwatchError::config(format!(
            "median kernel must be odd and positive, got {kernel_size}"
        )));
    }
    if kernel_size == 1 {
        return Ok(mask.clone());
    }

    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return Ok(mask.clone());
    }

    let radius = (kernel_size / 2) as i64;
    let raw = mask.as_raw();
    let mut window = Vec::with_capacity((kernel_size * kernel_size) as usize);

    let out = GrayImage::from_fn(width, height, |x, y| {
        window.clear();
        for dy in -radius..=radius {
            let sy = (y as i64 + dy).clamp(0, height as i64 - 1) as usize;
            for dx in -radius..=radius {
                let sx = (x as i64 + dx).clamp(0, width as i64 - 1) as usize;
                window.push(raw[sy * width as usize + sx]);
            }
        }
        let mid = window.len() / 2;
        let (_, median, _) = window.select_nth_unstable(mid);
        image::Luma([*median])
    });

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn removes_isolated_speckles() {
        let mut mask = GrayImage::new(20, 20);
        mask.put_pixel(3, 3, Luma([255]));
        mask.put_pixel(15, 9, Luma([255]));

        let out = median_blur(&mask, 5).unwrap();
        assert!(out.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn keeps_solid_rectangle_extent() {
        let mut mask = GrayImage::new(40, 40);
        for y in 10..30 {
            for x in 5..25 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }

        let out = median_blur(&mask, 5).unwrap();

        // Edge midpoints survive, corners are rounded off
        assert_eq!(out.get_pixel(15, 10)[0], 255);
        assert_eq!(out.get_pixel(5, 20)[0], 255);
        assert_eq!(out.get_pixel(24, 20)[0], 255);
        assert_eq!(out.get_pixel(5, 10)[0], 0);
        assert_eq!(out.get_pixel(4, 20)[0], 0);
    }

    #[test]
    fn replicated_border_keeps_full_frame_blob() {
        let mask = GrayImage::from_pixel(6, 6, Luma([255]));
        let out = median_blur(&mask, 5).unwrap();
        assert!(out.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn rejects_even_kernel() {
        assert!(median_blur(&GrayImage::new(4, 4), 4).is_err());
        assert!(median_blur(&GrayImage::new(4, 4), 0).is_err());
    }
}

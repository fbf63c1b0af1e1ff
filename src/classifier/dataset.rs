use crate::error::Result;
use image::GrayImage;
use std::fs;
use std::path::{Path, PathBuf};

/// Images of one class decoded as grayscale
pub struct LabeledImages {
    pub images: Vec<GrayImage>,
    /// Files that could not be decoded and were left out
    pub skipped: Vec<PathBuf>,
}

/// Decode every file of a directory as a grayscale image, in file-name order
///
/// Files that fail to decode are logged and skipped; only failing to read the
/// directory itself is an error.
pub fn load_grayscale_dir<P: AsRef<Path>>(dir: P) -> Result<LabeledImages> {
    let dir = dir.as_ref();
    let _span = tracing::info_span!("load_dataset", dir = %dir.display()).entered();

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut images = Vec::with_capacity(paths.len());
    let mut skipped = Vec::new();

    for path in paths {
        match image::open(&path) {
            Ok(img) => images.push(img.into_luma8()),
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                skipped.push(path);
            }
        }
    }

    tracing::info!(
        "Loaded {} images from {} ({} skipped)",
        images.len(),
        dir.display(),
        skipped.len()
    );

    Ok(LabeledImages { images, skipped })
}

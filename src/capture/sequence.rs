use super::FrameSource;
use anyhow::{Context, Result};
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};

/// Image files of a directory played back in lexical order
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    position: usize,
}

impl ImageSequence {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)
            .with_context(|| format!("Failed to read frame directory {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        tracing::info!("Found {} frames in {}", paths.len(), dir.display());

        Ok(Self::from_paths(paths))
    }

    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self { paths, position: 0 }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.paths.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;

        let frame = image::open(path)
            .with_context(|| format!("Failed to decode frame {}", path.display()))?
            .to_rgb8();
        Ok(Some(frame))
    }
}

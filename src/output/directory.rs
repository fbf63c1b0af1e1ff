use super::OutputSink;
use anyhow::{Context, Result};
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};

/// Writes every frame as a numbered PNG into a directory
pub struct DirectorySink {
    dir: PathBuf,
    written: u64,
}

impl DirectorySink {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

        tracing::info!("Writing annotated frames to {}", dir.display());

        Ok(Self { dir, written: 0 })
    }

    pub fn frames_written(&self) -> u64 {
        self.written
    }
}

impl OutputSink for DirectorySink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        self.written += 1;
        let path = self.dir.join(format!("frame_{:06}.png", self.written));
        frame
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Discards frames; used for headless runs
#[derive(Default)]
pub struct NullSink {
    pub frames: u64,
}

impl OutputSink for NullSink {
    fn write_frame(&mut self, _frame: &RgbImage) -> Result<()> {
        self.frames += 1;
        Ok(())
    }
}

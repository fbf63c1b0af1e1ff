mod filter;
mod mog2;
mod regions;
pub mod types;

pub use filter::median_blur;
pub use mog2::{Mog2, Mog2Config};
pub use regions::{BoundingBox, ProposerConfig, RegionProposer};
pub use types::{BackgroundModel, ForegroundMask, BACKGROUND, FOREGROUND, SHADOW};

use crate::error::Result;

/// Create the default background model (MOG2)
pub fn create_default_model(config: Mog2Config) -> Result<Box<dyn BackgroundModel>> {
    let model = Mog2::new(config)?;
    Ok(Box::new(model))
}

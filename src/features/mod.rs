mod hog;
mod preprocess;

pub use hog::{Descriptor, HogExtractor, HogParams};
pub use preprocess::{to_gray, Preprocessor};

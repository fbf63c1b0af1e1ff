use thiserror::Error;

pub type Result<T> = std::result::Result<T, WildwatchError>;

/// Errors surfaced by the detection and classification library
#[derive(Debug, Error)]
pub enum WildwatchError {
    /// Invalid setup: nothing is produced and the caller must fix its inputs
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A frame whose size differs from the one the background model was built for
    #[error("frame is {actual_width}x{actual_height} but the background model expects {expected_width}x{expected_height}")]
    FrameDimensions {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// Descriptor produced by a differently configured extractor than the classifier was trained with
    #[error("descriptor has {actual} values but the classifier expects {expected}")]
    DescriptorMismatch { expected: usize, actual: usize },

    #[error("invalid classifier artifact: {0}")]
    Artifact(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Serialization(#[from] bincode::Error),
}

impl WildwatchError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

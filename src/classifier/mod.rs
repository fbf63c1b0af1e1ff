mod artifact;
mod dataset;
mod labels;
mod platt;
mod svm;
mod trainer;

pub use artifact::{ClassifierArtifact, Prediction};
pub use dataset::{load_grayscale_dir, LabeledImages};
pub use labels::{LabelEncoder, ANIMAL, HUMAN};
pub use platt::PlattScaling;
pub use svm::{LinearSvm, SvmParams};
pub use trainer::{Split, Trainer, TrainerConfig, TrainingReport};

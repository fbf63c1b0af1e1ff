use super::artifact::ClassifierArtifact;
use super::labels::{LabelEncoder, ANIMAL, HUMAN};
use super::platt::PlattScaling;
use super::svm::{LinearSvm, SvmParams};
use crate::error::{Result, WildwatchError};
use crate::features::{Descriptor, HogExtractor, HogParams};
use image::GrayImage;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub hog: HogParams,
    pub svm: SvmParams,
    /// Share of each class held out for evaluation
    pub test_fraction: f64,
    /// Seed of the train/test split
    pub seed: u64,
    /// Cross-validation folds used to fit the probability calibration
    pub calibration_folds: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            hog: HogParams::default(),
            svm: SvmParams::default(),
            test_fraction: 0.2,
            seed: 42,
            calibration_folds: 5,
        }
    }
}

/// Sample indices of the two partitions, each sorted ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    /// Fraction of held-out samples predicted correctly, in [0, 1]
    pub accuracy: f64,
    pub train_count: usize,
    /// Indices into `positives` followed by `negatives` that were held out
    pub held_out: Vec<usize>,
}

pub struct Trainer {
    config: TrainerConfig,
    extractor: HogExtractor,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Result<Self> {
        if !(0.0..1.0).contains(&config.test_fraction) {
            return Err(WildwatchError::config(format!(
                "test fraction must be in [0, 1), got {}",
                config.test_fraction
            )));
        }
        let extractor = HogExtractor::new(config.hog)?;
        Ok(Self { config, extractor })
    }

    /// Fit a Human/Animal classifier and measure it on a held-out split
    ///
    /// `positives` are labeled "Human" and `negatives` "Animal". Sample `i` of
    /// the combined set is `positives[i]` for `i < positives.len()`, then the
    /// negatives in order; `TrainingReport::held_out` refers to that numbering.
    pub fn train(&self, positives: &[GrayImage], negatives: &[GrayImage]) -> Result<(ClassifierArtifact, TrainingReport)> {
        let _span = tracing::info_span!("train").entered();

        if positives.is_empty() || negatives.is_empty() {
            return Err(WildwatchError::config(format!(
                "training needs images of both classes (human: {}, animal: {})",
                positives.len(),
                negatives.len()
            )));
        }

        let encoder = LabelEncoder::fit([HUMAN, ANIMAL]);
        let human = encoder
            .encode(HUMAN)
            .ok_or_else(|| WildwatchError::config("label encoder lost the Human class"))?;
        let animal = encoder
            .encode(ANIMAL)
            .ok_or_else(|| WildwatchError::config("label encoder lost the Animal class"))?;

        tracing::info!(
            "Extracting descriptors from {} human and {} animal images",
            positives.len(),
            negatives.len()
        );
        let descriptors = positives
            .iter()
            .chain(negatives)
            .map(|img| self.extractor.extract(img))
            .collect::<Result<Vec<Descriptor>>>()?;
        let labels: Vec<usize> = std::iter::repeat(human)
            .take(positives.len())
            .chain(std::iter::repeat(animal).take(negatives.len()))
            .collect();

        let split = self.split(&labels)?;
        tracing::info!("Split: {} training, {} held out", split.train.len(), split.test.len());

        let svm = self.fit_svm(&descriptors, &labels, &split.train)?;
        let platt = self.calibrate(&descriptors, &labels, &split.train, &svm)?;
        let artifact = ClassifierArtifact::new(self.config.hog, encoder, svm, platt)?;

        let mut correct = 0usize;
        for &i in &split.test {
            if artifact.predict(&descriptors[i])? == labels[i] {
                correct += 1;
            }
        }
        let accuracy = correct as f64 / split.test.len() as f64;
        tracing::info!("Model accuracy: {:.2}", accuracy);

        let report = TrainingReport {
            accuracy,
            train_count: split.train.len(),
            held_out: split.test,
        };
        Ok((artifact, report))
    }

    /// Stratified, seeded train/test partition of sample indices
    pub fn split(&self, labels: &[usize]) -> Result<Split> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut train = Vec::new();
        let mut test = Vec::new();

        for class in distinct(labels) {
            let mut members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
            members.shuffle(&mut rng);

            let n = members.len();
            let n_test = if n > 1 {
                ((n as f64 * self.config.test_fraction).ceil() as usize).min(n - 1)
            } else {
                0
            };
            test.extend_from_slice(&members[..n_test]);
            train.extend_from_slice(&members[n_test..]);
        }

        if test.is_empty() {
            return Err(WildwatchError::config(
                "held-out split is empty; provide at least two images of one class",
            ));
        }

        train.sort_unstable();
        test.sort_unstable();
        Ok(Split { train, test })
    }

    fn fit_svm(&self, descriptors: &[Descriptor], labels: &[usize], indices: &[usize]) -> Result<LinearSvm> {
        let samples: Vec<&Descriptor> = indices.iter().map(|&i| &descriptors[i]).collect();
        let targets: Vec<f64> = indices.iter().map(|&i| target(labels[i])).collect();
        LinearSvm::fit(&samples, &targets, &self.config.svm)
    }

    /// Fit the sigmoid on out-of-fold decision values when every class can fill each fold
    fn calibrate(&self, descriptors: &[Descriptor], labels: &[usize], train: &[usize], svm: &LinearSvm) -> Result<PlattScaling> {
        let folds = self.config.calibration_folds;
        let smallest_class = distinct(labels)
            .into_iter()
            .map(|c| train.iter().filter(|&&i| labels[i] == c).count())
            .min()
            .unwrap_or(0);

        let mut decisions = Vec::with_capacity(train.len());
        let mut positive = Vec::with_capacity(train.len());

        if folds >= 2 && smallest_class >= folds {
            tracing::debug!("Calibrating on {}-fold cross-validated decisions", folds);

            let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(1));
            let mut fold_of = vec![0usize; descriptors.len()];
            for class in distinct(labels) {
                let mut members: Vec<usize> = train.iter().copied().filter(|&i| labels[i] == class).collect();
                members.shuffle(&mut rng);
                for (pos, i) in members.into_iter().enumerate() {
                    fold_of[i] = pos % folds;
                }
            }

            for fold in 0..folds {
                let fit_on: Vec<usize> = train.iter().copied().filter(|&i| fold_of[i] != fold).collect();
                let fold_svm = self.fit_svm(descriptors, labels, &fit_on)?;
                for &i in train.iter().filter(|&&i| fold_of[i] == fold) {
                    decisions.push(fold_svm.decision(&descriptors[i])?);
                    positive.push(labels[i] == 1);
                }
            }
        } else {
            tracing::debug!("Too few samples per class for cross-validation; calibrating in-sample");
            for &i in train {
                decisions.push(svm.decision(&descriptors[i])?);
                positive.push(labels[i] == 1);
            }
        }

        Ok(PlattScaling::fit(&decisions, &positive))
    }
}

/// Class index 1 is the positive side of the decision boundary
fn target(label: usize) -> f64 {
    if label == 1 {
        1.0
    } else {
        -1.0
    }
}

fn distinct(labels: &[usize]) -> Vec<usize> {
    let mut classes = labels.to_vec();
    classes.sort_unstable();
    classes.dedup();
    classes
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn stripes(vertical: bool, phase: u32) -> GrayImage {
        GrayImage::from_fn(32, 64, |x, y| {
            let t = if vertical { x } else { y };
            if (t + phase) % 8 < 4 {
                Luma([30])
            } else {
                Luma([220])
            }
        })
    }

    #[test]
    fn empty_collection_is_a_configuration_error() {
        let trainer = Trainer::new(TrainerConfig::default()).unwrap();
        let images = vec![stripes(true, 0)];

        assert!(matches!(
            trainer.train(&images, &[]),
            Err(WildwatchError::Configuration(_))
        ));
        assert!(matches!(
            trainer.train(&[], &images),
            Err(WildwatchError::Configuration(_))
        ));
    }

    #[test]
    fn split_is_stratified_and_seeded() {
        let trainer = Trainer::new(TrainerConfig::default()).unwrap();
        let labels: Vec<usize> = (0..20).map(|i| usize::from(i < 10)).collect();

        let a = trainer.split(&labels).unwrap();
        let b = trainer.split(&labels).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.test.len(), 4);
        assert_eq!(a.train.len(), 16);
        assert_eq!(a.test.iter().filter(|&&i| labels[i] == 1).count(), 2);
    }

    #[test]
    fn single_image_per_class_cannot_be_evaluated() {
        let trainer = Trainer::new(TrainerConfig::default()).unwrap();
        assert!(trainer.split(&[0, 1]).is_err());
    }

    #[test]
    fn learns_stripe_orientation() {
        let trainer = Trainer::new(TrainerConfig::default()).unwrap();
        let humans: Vec<GrayImage> = (0..10).map(|p| stripes(true, p)).collect();
        let animals: Vec<GrayImage> = (0..10).map(|p| stripes(false, p)).collect();

        let (artifact, report) = trainer.train(&humans, &animals).unwrap();

        assert!((0.0..=1.0).contains(&report.accuracy));
        assert_eq!(report.train_count + report.held_out.len(), 20);
        assert_eq!(report.accuracy, 1.0);

        let extractor = HogExtractor::new(*artifact.hog_params()).unwrap();
        let prediction = artifact.classify(&extractor.extract(&stripes(true, 3)).unwrap()).unwrap();
        assert_eq!(prediction.label, HUMAN);
    }
}

use super::labels::LabelEncoder;
use super::platt::PlattScaling;
use super::svm::LinearSvm;
use crate::error::{Result, WildwatchError};
use crate::features::{Descriptor, HogParams};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const MAGIC: [u8; 4] = *b"WWCA";
const FORMAT_VERSION: u32 = 1;

/// Trained classifier together with everything inference needs to interpret it
///
/// The label encoder and the HOG parameters travel with the decision boundary
/// so that output indices and descriptor layout can never drift apart from
/// the weights. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierArtifact {
    hog: HogParams,
    encoder: LabelEncoder,
    svm: LinearSvm,
    platt: PlattScaling,
}

/// Hard label plus the calibrated confidence behind it
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub index: usize,
    /// Probability of `label`, in percent
    pub confidence: f64,
}

#[derive(Serialize, Deserialize)]
struct ArtifactFile {
    magic: [u8; 4],
    version: u32,
    artifact: ClassifierArtifact,
}

impl ClassifierArtifact {
    pub(crate) fn new(hog: HogParams, encoder: LabelEncoder, svm: LinearSvm, platt: PlattScaling) -> Result<Self> {
        let artifact = Self {
            hog,
            encoder,
            svm,
            platt,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    fn validate(&self) -> Result<()> {
        if self.encoder.len() != 2 {
            return Err(WildwatchError::Artifact(format!(
                "binary classifier needs exactly two classes, found {}",
                self.encoder.len()
            )));
        }
        if self.svm.dim() != self.hog.descriptor_len() {
            return Err(WildwatchError::Artifact(format!(
                "classifier has {} weights but its HOG parameters produce {} values",
                self.svm.dim(),
                self.hog.descriptor_len()
            )));
        }
        Ok(())
    }

    pub fn hog_params(&self) -> &HogParams {
        &self.hog
    }

    pub fn encoder(&self) -> &LabelEncoder {
        &self.encoder
    }

    pub fn descriptor_len(&self) -> usize {
        self.svm.dim()
    }

    /// Calibrated probability per class, indexed like the label encoder
    pub fn predict_probabilities(&self, descriptor: &Descriptor) -> Result<[f64; 2]> {
        let positive = self.platt.probability(self.svm.decision(descriptor)?);
        Ok([1.0 - positive, positive])
    }

    /// Hard class index from the side of the decision boundary
    pub fn predict(&self, descriptor: &Descriptor) -> Result<usize> {
        Ok(usize::from(self.svm.decision(descriptor)? > 0.0))
    }

    /// Most probable label and its probability in percent
    pub fn classify(&self, descriptor: &Descriptor) -> Result<Prediction> {
        let probabilities = self.predict_probabilities(descriptor)?;
        let index = if probabilities[1] > probabilities[0] { 1 } else { 0 };
        let label = self
            .encoder
            .decode(index)
            .ok_or_else(|| WildwatchError::Artifact(format!("no label for class index {index}")))?;

        Ok(Prediction {
            label: label.to_string(),
            index,
            confidence: probabilities[index] * 100.0,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let file = ArtifactFile {
            magic: MAGIC,
            version: FORMAT_VERSION,
            artifact: self.clone(),
        };
        Ok(bincode::serialize(&file)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let file: ArtifactFile = bincode::deserialize(bytes)?;
        Self::from_file(file)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        tracing::info!("Saving classifier to {}", path.display());

        let mut writer = BufWriter::new(File::create(path)?);
        let file = ArtifactFile {
            magic: MAGIC,
            version: FORMAT_VERSION,
            artifact: self.clone(),
        };
        bincode::serialize_into(&mut writer, &file)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Loading classifier from {}", path.display());

        let reader = BufReader::new(File::open(path)?);
        let file: ArtifactFile = bincode::deserialize_from(reader)?;
        let artifact = Self::from_file(file)?;

        tracing::info!(
            "Classifier loaded: classes={:?}, descriptor_len={}",
            artifact.encoder.classes(),
            artifact.descriptor_len()
        );
        Ok(artifact)
    }

    fn from_file(file: ArtifactFile) -> Result<Self> {
        if file.magic != MAGIC {
            return Err(WildwatchError::Artifact("not a wildwatch classifier".to_string()));
        }
        if file.version != FORMAT_VERSION {
            return Err(WildwatchError::Artifact(format!(
                "unsupported format version {} (expected {FORMAT_VERSION})",
                file.version
            )));
        }
        file.artifact.validate()?;
        Ok(file.artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::labels::{ANIMAL, HUMAN};
    use crate::classifier::svm::SvmParams;
    use ndarray::Array1;

    fn tiny_params() -> HogParams {
        HogParams {
            window_width: 16,
            window_height: 16,
            cell_size: 8,
            block_size: 2,
            n_bins: 2,
        }
    }

    fn artifact() -> ClassifierArtifact {
        let dim = tiny_params().descriptor_len();
        let xs: Vec<Descriptor> = (0..6)
            .map(|i| {
                let s = if i < 3 { 1.0 } else { -1.0 };
                Array1::from_shape_fn(dim, |j| s * (1.0 + (i + j) as f64 * 0.1))
            })
            .collect();
        let ys = [1.0, 1.0, 1.0, -1.0, -1.0, -1.0];
        let refs: Vec<&Descriptor> = xs.iter().collect();
        let svm = LinearSvm::fit(&refs, &ys, &SvmParams::default()).unwrap();
        let decisions: Vec<f64> = xs.iter().map(|x| svm.decision(x).unwrap()).collect();
        let platt = PlattScaling::fit(&decisions, &[true, true, true, false, false, false]);

        ClassifierArtifact::new(tiny_params(), LabelEncoder::fit([HUMAN, ANIMAL]), svm, platt).unwrap()
    }

    #[test]
    fn probabilities_sum_to_one() {
        let artifact = artifact();
        let x = Array1::from_elem(artifact.descriptor_len(), 0.7);
        let [p0, p1] = artifact.predict_probabilities(&x).unwrap();
        assert!((p0 + p1 - 1.0).abs() < 1e-12);

        let prediction = artifact.classify(&x).unwrap();
        assert_eq!(prediction.label, HUMAN);
        assert!(prediction.confidence > 50.0 && prediction.confidence <= 100.0);
    }

    #[test]
    fn bytes_round_trip_exactly() {
        let artifact = artifact();
        let restored = ClassifierArtifact::from_bytes(&artifact.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, artifact);
    }

    #[test]
    fn rejects_foreign_blob() {
        let mut bytes = artifact().to_bytes().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            ClassifierArtifact::from_bytes(&bytes),
            Err(WildwatchError::Artifact(_))
        ));
    }

    #[test]
    fn rejects_mismatched_descriptor() {
        let artifact = artifact();
        let x = Array1::zeros(artifact.descriptor_len() + 1);
        assert!(matches!(
            artifact.classify(&x),
            Err(WildwatchError::DescriptorMismatch { .. })
        ));
    }
}

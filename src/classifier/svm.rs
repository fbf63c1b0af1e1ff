//! Linear support vector machine
//!
//! Hinge-loss SVM solved in the dual by coordinate descent. The bias is
//! learned as the weight of an implicit constant feature equal to 1.

use crate::error::{Result, WildwatchError};
use crate::features::Descriptor;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct SvmParams {
    /// Penalty on margin violations
    pub c: f64,
    pub max_iter: usize,
    /// Stop once the projected gradient spread drops below this
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 1000,
            tolerance: 1e-3,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearSvm {
    weights: Array1<f64>,
    bias: f64,
}

impl LinearSvm {
    pub(crate) fn from_parts(weights: Array1<f64>, bias: f64) -> Self {
        Self { weights, bias }
    }

    /// Fit on samples labeled +1 / -1
    pub fn fit(samples: &[&Descriptor], targets: &[f64], params: &SvmParams) -> Result<Self> {
        let _span = tracing::debug_span!("svm_fit", samples = samples.len()).entered();

        if samples.is_empty() || samples.len() != targets.len() {
            return Err(WildwatchError::config("SVM needs one target per sample and at least one sample"));
        }
        if !targets.iter().any(|t| *t > 0.0) || !targets.iter().any(|t| *t < 0.0) {
            return Err(WildwatchError::config("SVM needs samples of both classes"));
        }

        let dim = samples[0].len();
        if let Some(bad) = samples.iter().find(|s| s.len() != dim) {
            return Err(WildwatchError::DescriptorMismatch {
                expected: dim,
                actual: bad.len(),
            });
        }

        let diag: Vec<f64> = samples.iter().map(|x| x.dot(*x) + 1.0).collect();
        let mut alpha = vec![0.0f64; samples.len()];
        let mut weights = Array1::<f64>::zeros(dim);
        let mut bias = 0.0f64;

        let mut order: Vec<usize> = (0..samples.len()).collect();
        let mut rng = StdRng::seed_from_u64(params.seed);

        let mut iterations = 0;
        while iterations < params.max_iter {
            iterations += 1;
            order.shuffle(&mut rng);

            let mut max_pg = f64::NEG_INFINITY;
            let mut min_pg = f64::INFINITY;

            for &i in &order {
                let y = targets[i];
                let gradient = y * (weights.dot(samples[i]) + bias) - 1.0;

                let projected = if alpha[i] == 0.0 {
                    gradient.min(0.0)
                } else if alpha[i] == params.c {
                    gradient.max(0.0)
                } else {
                    gradient
                };
                max_pg = max_pg.max(projected);
                min_pg = min_pg.min(projected);

                if projected.abs() > 1e-12 {
                    let old = alpha[i];
                    alpha[i] = (old - gradient / diag[i]).clamp(0.0, params.c);
                    let delta = (alpha[i] - old) * y;
                    weights.scaled_add(delta, samples[i]);
                    bias += delta;
                }
            }

            if max_pg - min_pg < params.tolerance {
                break;
            }
        }

        let support = alpha.iter().filter(|a| **a > 0.0).count();
        tracing::debug!("SVM converged after {} iterations with {} support vectors", iterations, support);

        Ok(Self { weights, bias })
    }

    /// Signed distance to the separating hyperplane, positive for the +1 class
    pub fn decision(&self, descriptor: &Descriptor) -> Result<f64> {
        if descriptor.len() != self.weights.len() {
            return Err(WildwatchError::DescriptorMismatch {
                expected: self.weights.len(),
                actual: descriptor.len(),
            });
        }
        Ok(self.weights.dot(descriptor) + self.bias)
    }

    pub fn dim(&self) -> usize {
        self.weights.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn separates_linearly_separable_points() {
        let xs = [
            array![2.0, 2.0],
            array![3.0, 2.5],
            array![2.5, 3.5],
            array![-2.0, -1.5],
            array![-3.0, -2.0],
            array![-1.5, -3.0],
        ];
        let ys = [1.0, 1.0, 1.0, -1.0, -1.0, -1.0];
        let refs: Vec<&Descriptor> = xs.iter().collect();

        let svm = LinearSvm::fit(&refs, &ys, &SvmParams::default()).unwrap();

        for (x, y) in xs.iter().zip(ys) {
            assert!(svm.decision(x).unwrap() * y > 0.0);
        }
    }

    #[test]
    fn fit_is_reproducible() {
        let xs: Vec<Descriptor> = (0..20)
            .map(|i| {
                let s = if i % 2 == 0 { 1.0 } else { -1.0 };
                array![s * (1.0 + i as f64 * 0.1), (i as f64 * 0.37).sin()]
            })
            .collect();
        let ys: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let refs: Vec<&Descriptor> = xs.iter().collect();

        let a = LinearSvm::fit(&refs, &ys, &SvmParams::default()).unwrap();
        let b = LinearSvm::fit(&refs, &ys, &SvmParams::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_single_class() {
        let xs = [array![1.0], array![2.0]];
        let refs: Vec<&Descriptor> = xs.iter().collect();
        assert!(LinearSvm::fit(&refs, &[1.0, 1.0], &SvmParams::default()).is_err());
    }

    #[test]
    fn rejects_wrong_length_at_inference() {
        let xs = [array![1.0, 0.0], array![-1.0, 0.0]];
        let refs: Vec<&Descriptor> = xs.iter().collect();
        let svm = LinearSvm::fit(&refs, &[1.0, -1.0], &SvmParams::default()).unwrap();

        assert!(matches!(
            svm.decision(&array![1.0, 0.0, 0.0]),
            Err(WildwatchError::DescriptorMismatch { expected: 2, actual: 3 })
        ));
    }
}

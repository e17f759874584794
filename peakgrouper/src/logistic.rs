//! The match-confidence classifier capability and its logistic regression
//! reference implementation.
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::model::ScoringModelRecord;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("Cannot fit a scoring model on an empty feature matrix")]
    EmptyTrainingSet,
    #[error("Feature matrix has {rows} rows but {labels} labels were given")]
    ShapeMismatch { rows: usize, labels: usize },
    #[error("The weighted least squares system could not be solved")]
    SingularSystem,
}

/// A swappable scoring capability. The contract only requires a monotonic
/// probability-like score in `[0, 1]` per feature row.
pub trait MatchScorer {
    fn fit(&mut self, features: &DMatrix<f64>, labels: &[bool]) -> Result<(), ScoringError>;

    /// Per-row probability of being a true match. Rows containing
    /// non-finite values score 0.
    fn predict_proba(&self, features: &DMatrix<f64>) -> Vec<f64>;
}

/// L2-flavored logistic regression fit by iteratively reweighted least
/// squares. A small ridge term keeps the normal equations solvable when the
/// classes are separable.
#[derive(Debug, Clone, Default)]
pub struct LogisticModelScorer {
    /// Intercept first, then one weight per feature column.
    pub coefficients: Option<DVector<f64>>,
    pub max_iterations: usize,
    pub convergence_tolerance: f64,
}

const DEFAULT_MAX_ITERATIONS: usize = 25;
const DEFAULT_CONVERGENCE_TOLERANCE: f64 = 1e-8;
const RIDGE: f64 = 1e-6;

#[inline]
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl LogisticModelScorer {
    pub fn new() -> Self {
        Self {
            coefficients: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            convergence_tolerance: DEFAULT_CONVERGENCE_TOLERANCE,
        }
    }

    /// Rehydrate a scorer from a stored coefficient record instead of
    /// fitting.
    pub fn from_scoring_model(record: &ScoringModelRecord) -> Self {
        Self {
            coefficients: Some(DVector::from_vec(record.coefficients.clone())),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            convergence_tolerance: DEFAULT_CONVERGENCE_TOLERANCE,
        }
    }

    /// Prepend the intercept column of ones.
    fn augment(features: &DMatrix<f64>) -> DMatrix<f64> {
        let mut augmented = DMatrix::from_element(features.nrows(), features.ncols() + 1, 1.0);
        augmented
            .view_mut((0, 1), (features.nrows(), features.ncols()))
            .copy_from(features);
        augmented
    }

    fn row_score(&self, coefficients: &DVector<f64>, row: &[f64]) -> f64 {
        if row.iter().any(|v| !v.is_finite()) {
            return 0.0;
        }
        let mut eta = coefficients[0];
        for (value, weight) in row.iter().zip(coefficients.iter().skip(1)) {
            eta += value * weight;
        }
        sigmoid(eta)
    }
}

impl MatchScorer for LogisticModelScorer {
    fn fit(&mut self, features: &DMatrix<f64>, labels: &[bool]) -> Result<(), ScoringError> {
        let n = features.nrows();
        if n == 0 {
            return Err(ScoringError::EmptyTrainingSet);
        }
        if n != labels.len() {
            return Err(ScoringError::ShapeMismatch {
                rows: n,
                labels: labels.len(),
            });
        }

        let x = Self::augment(features);
        let p = x.ncols();
        let y = DVector::from_iterator(n, labels.iter().map(|&l| if l { 1.0 } else { 0.0 }));

        let mut beta: DVector<f64> = DVector::zeros(p);
        for _ in 0..self.max_iterations {
            let eta = &x * &beta;
            let mu = eta.map(sigmoid);
            let weights = mu.map(|m| (m * (1.0 - m)).max(1e-10));

            // X^T W X + ridge on the diagonal
            let mut xtwx = DMatrix::zeros(p, p);
            for i in 0..n {
                let row = x.row(i);
                let w = weights[i];
                for a in 0..p {
                    for b in 0..p {
                        xtwx[(a, b)] += row[a] * w * row[b];
                    }
                }
            }
            for d in 0..p {
                xtwx[(d, d)] += RIDGE;
            }

            let residual = &y - &mu;
            let gradient = x.transpose() * residual;
            let delta = xtwx
                .lu()
                .solve(&gradient)
                .ok_or(ScoringError::SingularSystem)?;
            beta += &delta;
            if delta.amax() < self.convergence_tolerance {
                break;
            }
        }

        self.coefficients = Some(beta);
        Ok(())
    }

    fn predict_proba(&self, features: &DMatrix<f64>) -> Vec<f64> {
        let Some(coefficients) = self.coefficients.as_ref() else {
            return vec![0.0; features.nrows()];
        };
        (0..features.nrows())
            .map(|i| {
                let row: Vec<f64> = features.row(i).iter().copied().collect();
                self.row_score(coefficients, &row)
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fit_separates_classes() {
        let values: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let labels: Vec<bool> = (0..20).map(|i| i >= 10).collect();
        let features = DMatrix::from_column_slice(20, 1, &values);

        let mut scorer = LogisticModelScorer::new();
        scorer.fit(&features, &labels).unwrap();

        let probabilities = scorer.predict_proba(&features);
        assert!(probabilities.iter().all(|&p| (0.0..=1.0).contains(&p)));
        assert!(probabilities[0] < 0.5);
        assert!(probabilities[19] > 0.5);
        // Monotonic in the single feature.
        for pair in probabilities.windows(2) {
            assert!(pair[0] <= pair[1] + 1e-12);
        }
    }

    #[test]
    fn test_from_scoring_model() {
        let record = ScoringModelRecord {
            name: ScoringModelRecord::GENERIC_MODEL_NAME.to_string(),
            coefficients: vec![0.0, 3f64.ln()],
        };
        let scorer = LogisticModelScorer::from_scoring_model(&record);
        let features = DMatrix::from_column_slice(1, 1, &[1.0]);
        let probabilities = scorer.predict_proba(&features);
        assert!((probabilities[0] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_nan_rows_score_zero() {
        let record = ScoringModelRecord {
            name: "m".to_string(),
            coefficients: vec![0.0, 1.0],
        };
        let scorer = LogisticModelScorer::from_scoring_model(&record);
        let features = DMatrix::from_column_slice(2, 1, &[f64::NAN, 0.0]);
        let probabilities = scorer.predict_proba(&features);
        assert_eq!(probabilities[0], 0.0);
        assert!((probabilities[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_training_set_is_an_error() {
        let mut scorer = LogisticModelScorer::new();
        let features = DMatrix::<f64>::zeros(0, 3);
        assert_eq!(
            scorer.fit(&features, &[]),
            Err(ScoringError::EmptyTrainingSet)
        );
    }
}

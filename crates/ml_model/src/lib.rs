//! ML model crate for credit-scoring predictions.
//!
//! Wraps an opaque probabilistic binary classifier behind the [`Classifier`]
//! capability, resolves which probability column means "default" by class
//! label rather than position, and applies the decision threshold.

use std::sync::Arc;

use scoring_structs::{ModelInput, PredictionLabel};

mod cache;
mod network;

pub use cache::{CheckpointLoader, ModelCache, ModelLoader};
pub use network::{NetworkClassifier, NetworkConfig, ScoringNetwork, load_checkpoint, save_checkpoint};

/// Class label of the "default" (non-solvent) outcome.
pub const DEFAULT_CLASS: i64 = 1;

/// Class label of the solvent outcome.
pub const SOLVABLE_CLASS: i64 = 0;

/// Classes assumed when a classifier does not report its own.
pub const DEFAULT_CLASSES: [i64; 2] = [SOLVABLE_CLASS, DEFAULT_CLASS];

/// Default-probability threshold at or above which a record is non-solvable.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// A loaded probabilistic classifier.
///
/// Implementations are immutable once loaded and shared across requests.
pub trait Classifier: Send + Sync {
    /// Class labels in the order of the probability columns, if known.
    fn classes(&self) -> Option<&[i64]> {
        None
    }

    /// Returns one probability row per input, columns ordered as
    /// [`Classifier::classes`].
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails.
    fn predict_proba(&self, rows: &[ModelInput]) -> anyhow::Result<Vec<Vec<f64>>>;
}

/// The classifier's classes do not allow resolving a required label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("class {missing} not found in classifier classes {classes:?}")]
pub struct ClassifierConfigurationError {
    pub missing: i64,
    pub classes: Vec<i64>,
}

/// Failures while classifying a batch.
#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error(transparent)]
    Configuration(#[from] ClassifierConfigurationError),
    #[error("classifier invocation failed: {0}")]
    Inference(#[source] anyhow::Error),
    #[error("classifier returned {actual} probability rows for {expected} records")]
    RowCount { expected: usize, actual: usize },
    #[error("probability row {row} has {len} columns, expected at least {needed}")]
    ShortRow { row: usize, len: usize, needed: usize },
    #[error("probability row {row} contains {value}, expected a value in [0, 1]")]
    InvalidProbability { row: usize, value: f64 },
}

/// Positions of the default and solvable classes in a probability row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassIndices {
    pub default: usize,
    pub solvable: usize,
}

impl ClassIndices {
    /// Finds the columns of [`DEFAULT_CLASS`] and [`SOLVABLE_CLASS`].
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierConfigurationError`] if either label is absent.
    pub fn resolve(classes: &[i64]) -> Result<Self, ClassifierConfigurationError> {
        let position = |label: i64| {
            classes
                .iter()
                .position(|&c| c == label)
                .ok_or_else(|| ClassifierConfigurationError {
                    missing: label,
                    classes: classes.to_vec(),
                })
        };

        Ok(Self {
            default: position(DEFAULT_CLASS)?,
            solvable: position(SOLVABLE_CLASS)?,
        })
    }
}

/// Thresholded outcome for one record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub label: PredictionLabel,
    /// Probability of the returned label.
    pub proba: f64,
    pub proba_default: f64,
    pub proba_solvable: f64,
}

impl Decision {
    /// Applies `p(default) >= threshold` semantics to a pair of class
    /// probabilities.
    #[must_use]
    pub fn from_probabilities(proba_default: f64, proba_solvable: f64, threshold: f64) -> Self {
        let (label, proba) = if proba_default >= threshold {
            (PredictionLabel::NonSolvable, proba_default)
        } else {
            (PredictionLabel::Solvable, proba_solvable)
        };

        Self {
            label,
            proba,
            proba_default,
            proba_solvable,
        }
    }
}

/// Classifier plus the threshold policy applied to its output.
#[derive(Clone)]
pub struct ClassifierAdapter {
    classifier: Arc<dyn Classifier>,
    threshold: f64,
}

impl ClassifierAdapter {
    #[must_use]
    pub fn new(classifier: Arc<dyn Classifier>, threshold: f64) -> Self {
        Self {
            classifier,
            threshold,
        }
    }

    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// The classifier's classes, or [`DEFAULT_CLASSES`] if it reports none.
    #[must_use]
    pub fn classes(&self) -> Vec<i64> {
        self.classifier
            .classes()
            .map_or_else(|| DEFAULT_CLASSES.to_vec(), <[i64]>::to_vec)
    }

    /// Classifies every row, preserving order.
    ///
    /// # Errors
    ///
    /// Returns [`ClassificationError`] if the classes cannot be resolved,
    /// inference fails, or the output shape does not match the batch.
    pub fn classify(&self, rows: &[ModelInput]) -> Result<Vec<Decision>, ClassificationError> {
        let indices = ClassIndices::resolve(&self.classes())?;
        let needed = indices.default.max(indices.solvable) + 1;

        let probabilities = self
            .classifier
            .predict_proba(rows)
            .map_err(ClassificationError::Inference)?;

        if probabilities.len() != rows.len() {
            return Err(ClassificationError::RowCount {
                expected: rows.len(),
                actual: probabilities.len(),
            });
        }

        probabilities
            .iter()
            .enumerate()
            .map(|(row, p)| match (p.get(indices.default), p.get(indices.solvable)) {
                (Some(&p_default), Some(&p_solvable)) => {
                    if let Some(&value) = [p_default, p_solvable]
                        .iter()
                        .find(|v| !(0.0..=1.0).contains(*v))
                    {
                        return Err(ClassificationError::InvalidProbability { row, value });
                    }
                    Ok(Decision::from_probabilities(
                        p_default,
                        p_solvable,
                        self.threshold,
                    ))
                }
                _ => Err(ClassificationError::ShortRow {
                    row,
                    len: p.len(),
                    needed,
                }),
            })
            .collect()
    }
}

//! Scorer port: Trait for the pre-trained binary classifier.
//!
//! This trait abstracts the model runtime from the application logic. The
//! pipeline hands it one standardized feature vector at a time.

use std::sync::Arc;

use crate::domain::{AnemiaClass, StandardScaler, UsedFeatureSet};

/// Raw classifier output for one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub class: AnemiaClass,
    /// `[p(class 0), p(class 1)]`
    pub probabilities: [f64; 2],
}

/// Error type for scoring.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScorerError {
    #[error("Feature vector has {got} entries, model expects {expected}")]
    Shape { expected: usize, got: usize },

    #[error("Feature vector contains a non-finite value")]
    NonFinite,

    #[error("Scoring failed: {0}")]
    Failed(String),
}

/// Trait for the binary anemia classifier.
///
/// Implementations must be deterministic for a given input vector and must
/// not depend on other rows of the batch.
pub trait Scorer: Send + Sync {
    /// Number of features the model expects.
    fn n_features(&self) -> usize;

    /// Score one standardized feature vector.
    ///
    /// # Errors
    /// Returns `ScorerError::Shape` on a length mismatch and
    /// `ScorerError::Failed` for runtime failures.
    fn score(&self, features: &[f64]) -> Result<Score, ScorerError>;
}

/// Everything needed to score: feature order, scaler and classifier.
#[derive(Clone)]
pub struct ModelBundle {
    pub used_features: UsedFeatureSet,
    pub scaler: StandardScaler,
    pub scorer: Arc<dyn Scorer>,
}

impl ModelBundle {
    /// Assemble a bundle, checking that the parts agree on the feature count.
    ///
    /// # Errors
    /// Returns a message naming the mismatched part.
    pub fn new(
        used_features: UsedFeatureSet,
        scaler: StandardScaler,
        scorer: Arc<dyn Scorer>,
    ) -> Result<Self, String> {
        let n = used_features.len();
        if scaler.len() != n {
            return Err(format!(
                "scaler has {} entries for {n} features",
                scaler.len()
            ));
        }
        if scorer.n_features() != n {
            return Err(format!(
                "model expects {} features, feature list has {n}",
                scorer.n_features()
            ));
        }
        Ok(Self {
            used_features,
            scaler,
            scorer,
        })
    }
}

impl std::fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBundle")
            .field("used_features", &self.used_features)
            .field("n_features", &self.scorer.n_features())
            .finish_non_exhaustive()
    }
}

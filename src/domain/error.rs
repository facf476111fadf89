//! Pipeline error taxonomy.

use super::features::Feature;

/// Errors raised while preparing or scoring a batch.
///
/// Malformed individual values never produce an error; they become missing
/// and are handled by row filtering.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    /// A required feature has no matching input column at all.
    #[error("Missing required columns: {}", join_features(.0))]
    MissingColumns(Vec<Feature>),

    /// Every row had a missing value in a required feature.
    #[error("No valid rows for inference: all {total_rows} row(s) have missing values in required features")]
    EmptyResult { total_rows: usize },

    /// Several headers denote the same feature and the policy rejects that.
    #[error("Ambiguous columns: {}", .0.join("; "))]
    AmbiguousColumns(Vec<String>),

    /// Model, scaler or feature list could not be loaded.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// The classifier failed on validated input.
    #[error("Inference failed: {0}")]
    Inference(String),

    /// The input itself could not be read as a table.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PipelineError {
    /// Whether the error describes bad caller input rather than a system fault.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingColumns(_)
                | Self::EmptyResult { .. }
                | Self::AmbiguousColumns(_)
                | Self::InvalidInput(_)
        )
    }
}

fn join_features(features: &[Feature]) -> String {
    features
        .iter()
        .map(Feature::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_message_names_features() {
        let err = PipelineError::MissingColumns(vec![Feature::Mcv, Feature::Plt]);
        assert_eq!(err.to_string(), "Missing required columns: MCV, PLT");
        assert!(err.is_validation());
    }

    #[test]
    fn test_system_errors_are_not_validation() {
        assert!(!PipelineError::ModelUnavailable("x".into()).is_validation());
        assert!(!PipelineError::Inference("x".into()).is_validation());
    }
}

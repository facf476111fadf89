//! Prediction result types.
//!
//! Represents the classifier verdict for one validated CBC row.

use serde::{Deserialize, Serialize};

use super::record::CbcRecord;
use super::report::ClinicalReport;

/// Binary anemia verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum AnemiaClass {
    /// Class 0: no anemia
    Normal,
    /// Class 1: anemia
    Anemia,
}

impl AnemiaClass {
    /// Numeric class code used by the model (0 or 1).
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Anemia => 1,
        }
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Normal),
            1 => Some(Self::Anemia),
            _ => None,
        }
    }

    /// Short label for display.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Anemia => "Anemia",
        }
    }
}

impl From<AnemiaClass> for u8 {
    fn from(class: AnemiaClass) -> Self {
        class.code()
    }
}

impl TryFrom<u8> for AnemiaClass {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("Invalid class code: {code}"))
    }
}

impl std::fmt::Display for AnemiaClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Probability of each class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub normal: f64,
    pub anemia: f64,
}

impl ClassProbabilities {
    #[must_use]
    pub fn new(normal: f64, anemia: f64) -> Self {
        Self { normal, anemia }
    }

    /// Probabilities from P(anemia).
    #[must_use]
    pub fn from_anemia(p: f64) -> Self {
        Self::new(1.0 - p, p)
    }

    /// Probability mass of one class.
    #[must_use]
    pub fn of(&self, class: AnemiaClass) -> f64 {
        match class {
            AnemiaClass::Normal => self.normal,
            AnemiaClass::Anemia => self.anemia,
        }
    }

    /// Whether both entries are finite and inside `[0, 1]`.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        [self.normal, self.anemia]
            .iter()
            .all(|p| p.is_finite() && (0.0..=1.0).contains(p))
    }
}

/// Confidence band reported alongside the percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    /// Confidence above 80%
    High,
    Medium,
}

/// Verdict for one validated row.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    /// 0-based ordinal within the valid rows of the batch
    pub row_index: usize,
    pub predicted_class: AnemiaClass,
    /// Probability of the predicted class (0.0 to 1.0)
    pub confidence: f64,
    pub probabilities: ClassProbabilities,
    /// Normalized values the verdict was computed from
    pub source_row: CbcRecord,
}

impl PredictionResult {
    /// Create a result; confidence is the mass of the predicted class.
    #[must_use]
    pub fn new(
        row_index: usize,
        predicted_class: AnemiaClass,
        probabilities: ClassProbabilities,
        source_row: CbcRecord,
    ) -> Self {
        Self {
            row_index,
            predicted_class,
            confidence: probabilities.of(predicted_class),
            probabilities,
            source_row,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        self.predicted_class.label()
    }

    /// Confidence as a percentage with two decimals, e.g. `"87.50%"`.
    #[must_use]
    pub fn confidence_percent(&self) -> String {
        format!("{:.2}%", self.confidence * 100.0)
    }

    #[must_use]
    pub fn confidence_band(&self) -> ConfidenceBand {
        if self.confidence > 0.8 {
            ConfidenceBand::High
        } else {
            ConfidenceBand::Medium
        }
    }

    /// Rule-based explanation of this verdict.
    #[must_use]
    pub fn report(&self) -> ClinicalReport {
        ClinicalReport::build(&self.source_row, self.predicted_class)
    }

    /// Shape handed to callers (web layer, JSON output).
    #[must_use]
    pub fn to_output(&self, include_report: bool) -> PredictionOutput {
        PredictionOutput {
            row_index: self.row_index,
            id: self.source_row.id.clone(),
            predicted_class: self.predicted_class,
            label: self.label().to_string(),
            confidence: self.confidence,
            confidence_percent: self.confidence_percent(),
            confidence_band: self.confidence_band(),
            probabilities: self.probabilities,
            values: self.source_row.clone(),
            report: include_report.then(|| self.report().to_string()),
        }
    }
}

/// Serializable per-row output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutput {
    pub row_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub predicted_class: AnemiaClass,
    pub label: String,
    pub confidence: f64,
    pub confidence_percent: String,
    pub confidence_band: ConfidenceBand,
    pub probabilities: ClassProbabilities,
    pub values: CbcRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
}

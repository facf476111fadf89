//! Persisted analysis records.
//!
//! A [`CbcAnalysis`] is the stored form of one prediction, tagged with
//! provenance (who uploaded it, for which patient, through which path).

use serde::{Deserialize, Serialize};

use super::prediction::{AnemiaClass, ClassProbabilities, PredictionResult};

/// How the lab values entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    Csv,
    Manual,
    Api,
}

impl AnalysisSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Manual => "manual",
            Self::Api => "api",
        }
    }

    /// Parse the stored form; unknown values fall back to `Api`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "csv" => Self::Csv,
            "manual" => Self::Manual,
            _ => Self::Api,
        }
    }
}

impl std::fmt::Display for AnalysisSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored CBC analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CbcAnalysis {
    /// Unique identifier (UUID v4)
    pub id: String,

    /// Reference to patient (if known)
    pub patient_id: Option<String>,

    /// Account that submitted the data
    pub uploaded_by: Option<String>,

    pub source: AnalysisSource,

    /// Position within the valid rows of the submitted batch
    pub row_index: usize,

    pub predicted_class: AnemiaClass,

    /// Probability of the predicted class
    pub confidence: f64,

    pub probabilities: ClassProbabilities,

    /// Rendered clinical report
    pub report: Option<String>,

    pub notes: String,

    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl CbcAnalysis {
    /// Create an analysis record from a prediction.
    #[must_use]
    pub fn from_prediction(result: &PredictionResult, source: AnalysisSource) -> Self {
        Self {
            id: uuid_v4(),
            patient_id: None,
            uploaded_by: None,
            source,
            row_index: result.row_index,
            predicted_class: result.predicted_class,
            confidence: result.confidence,
            probabilities: result.probabilities,
            report: None,
            notes: String::new(),
            created_at: chrono::Utc::now(),
        }
    }

    #[must_use]
    pub fn with_patient(mut self, patient_id: Option<impl Into<String>>) -> Self {
        self.patient_id = patient_id.map(Into::into);
        self
    }

    #[must_use]
    pub fn with_uploader(mut self, uploaded_by: Option<impl Into<String>>) -> Self {
        self.uploaded_by = uploaded_by.map(Into::into);
        self
    }

    #[must_use]
    pub fn with_report(mut self, report: Option<String>) -> Self {
        self.report = report;
        self
    }

    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

/// Generate a random UUID v4 from a CSPRNG seeded with OS entropy.
pub(crate) fn uuid_v4() -> String {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    let mut rng = ChaCha20Rng::from_entropy();
    let mut bytes: [u8; 16] = rng.gen();
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

//! Rule-based clinical report.
//!
//! A fixed decision table over the raw lab values and the model verdict:
//! red-cell size (MCV) picks the phenotype, MCHC and RDW add hints, and the
//! phenotype adds follow-up tests to a base panel. No learned component.
//! Building a report never fails; absent values drop their clause.

use std::fmt;

use serde::Serialize;

use super::prediction::AnemiaClass;
use super::record::CbcRecord;

const NORMAL_HEADLINE: &str = "Result: no anemia detected";
const NORMAL_NOTE: &str = "Note: keep a healthy lifestyle, stay well hydrated, and repeat the CBC periodically as advised by your doctor.";
const ANEMIA_HEADLINE: &str = "Result: anemia detected";

const BASE_TESTS: [&str; 3] = [
    "Repeat CBC to confirm",
    "Ferritin + serum iron + TIBC/transferrin saturation",
    "CRP/ESR if an inflammatory or chronic disease is suspected",
];

const LIFESTYLE: [&str; 3] = [
    "Eat iron-rich foods: liver, red meat, lentils, beans, spinach",
    "Take vitamin C with meals to improve iron absorption",
    "Avoid tea and coffee right after iron-rich meals (wait 1-2 hours)",
];

const RED_FLAGS: [&str; 3] = [
    "Recurrent dizziness or fainting, severe shortness of breath, chest pain",
    "Severe drop in hemoglobin",
    "Visible bleeding: vomiting blood, black stools, heavy uterine bleeding",
];

const DISCLAIMER: &str = "Important: this is an automated advisory report and not a final diagnosis. Treatment decisions rest entirely with the treating physician.";

/// MCV below this is microcytic (fL).
pub const MICROCYTIC_MCV: f64 = 80.0;
/// MCV above this is macrocytic (fL).
pub const MACROCYTIC_MCV: f64 = 100.0;
/// MCHC below this is hypochromic (g/dL).
pub const HYPOCHROMIC_MCHC: f64 = 32.0;
/// RDW above this indicates marked anisocytosis (%).
pub const HIGH_RDW: f64 = 14.5;

/// Anemia sub-type by red-cell size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phenotype {
    Microcytic,
    Macrocytic,
    Normocytic,
    Undetermined,
}

impl Phenotype {
    /// Classify by MCV; missing MCV is undetermined.
    #[must_use]
    pub fn from_mcv(mcv: Option<f64>) -> Self {
        match mcv.filter(|v| v.is_finite()) {
            None => Self::Undetermined,
            Some(v) if v < MICROCYTIC_MCV => Self::Microcytic,
            Some(v) if v > MACROCYTIC_MCV => Self::Macrocytic,
            Some(_) => Self::Normocytic,
        }
    }

    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Microcytic => "microcytic anemia (commonly an iron-deficiency pattern)",
            Self::Macrocytic => {
                "macrocytic anemia (may suggest B12/folate deficiency or other causes)"
            }
            Self::Normocytic => {
                "normocytic anemia (may relate to chronic disease, acute blood loss or renal causes)"
            }
            Self::Undetermined => "undetermined",
        }
    }

    /// Tests added to the base panel for this phenotype.
    #[must_use]
    pub fn extra_tests(&self) -> &'static [&'static str] {
        match self {
            Self::Microcytic => &[
                "Fecal occult blood test (FOBT) as indicated by age and symptoms",
                "Evaluate for uterine bleeding or malabsorption when relevant",
            ],
            Self::Macrocytic => &[
                "Vitamin B12 and folate levels",
                "Thyroid function (TSH)",
                "Liver function tests (LFTs)",
            ],
            Self::Normocytic => &[
                "Renal function (creatinine/eGFR)",
                "Screen for chronic disease or acute bleeding",
            ],
            Self::Undetermined => &[],
        }
    }
}

/// Independent supporting observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportingHint {
    Hypochromic,
    HighRdw,
}

impl SupportingHint {
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Hypochromic => "hypochromia (supports iron deficiency)",
            Self::HighRdw => "high RDW, marked variation in cell size",
        }
    }
}

/// Structured explanation of a verdict.
///
/// For a normal verdict only `predicted_class` is meaningful; every other
/// field is empty and the rendered text is the fixed "no anemia" message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClinicalReport {
    pub predicted_class: AnemiaClass,
    pub hgb: Option<f64>,
    pub mcv: Option<f64>,
    pub phenotype: Option<Phenotype>,
    pub hints: Vec<SupportingHint>,
    pub suggested_tests: Vec<&'static str>,
    pub lifestyle: Vec<&'static str>,
    pub red_flags: Vec<&'static str>,
}

impl ClinicalReport {
    /// Build the report for a row and its verdict.
    #[must_use]
    pub fn build(row: &CbcRecord, predicted_class: AnemiaClass) -> Self {
        if predicted_class == AnemiaClass::Normal {
            return Self {
                predicted_class,
                hgb: None,
                mcv: None,
                phenotype: None,
                hints: Vec::new(),
                suggested_tests: Vec::new(),
                lifestyle: Vec::new(),
                red_flags: Vec::new(),
            };
        }

        let mcv = row.mcv.filter(|v| v.is_finite());
        let phenotype = Phenotype::from_mcv(mcv);

        let mut hints = Vec::new();
        if row.mchc.is_some_and(|v| v < HYPOCHROMIC_MCHC) {
            hints.push(SupportingHint::Hypochromic);
        }
        if row.rdw.is_some_and(|v| v > HIGH_RDW) {
            hints.push(SupportingHint::HighRdw);
        }

        let mut suggested_tests = BASE_TESTS.to_vec();
        suggested_tests.extend_from_slice(phenotype.extra_tests());

        Self {
            predicted_class,
            hgb: row.hgb.filter(|v| v.is_finite()),
            mcv,
            phenotype: Some(phenotype),
            hints,
            suggested_tests,
            lifestyle: LIFESTYLE.to_vec(),
            red_flags: RED_FLAGS.to_vec(),
        }
    }
}

impl fmt::Display for ClinicalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(phenotype) = self.phenotype else {
            return write!(f, "{NORMAL_HEADLINE}\n{NORMAL_NOTE}");
        };

        writeln!(f, "{ANEMIA_HEADLINE}")?;
        if let Some(hgb) = self.hgb {
            writeln!(f, "Hb: {hgb:.1} g/dL")?;
        }
        if let Some(mcv) = self.mcv {
            writeln!(f, "MCV: {mcv:.1} fL")?;
        }
        writeln!(f, "Expected phenotype: {}", phenotype.description())?;
        if !self.hints.is_empty() {
            let hints: Vec<&str> = self.hints.iter().map(SupportingHint::description).collect();
            writeln!(f, "Supporting notes: {}", hints.join("; "))?;
        }

        writeln!(f, "\nSuggested tests (per physician assessment):")?;
        for t in &self.suggested_tests {
            writeln!(f, "- {t}")?;
        }

        writeln!(f, "\nLifestyle guidance:")?;
        for tip in &self.lifestyle {
            writeln!(f, "- {tip}")?;
        }

        writeln!(f, "\nRed flags requiring urgent medical review:")?;
        for flag in &self.red_flags {
            writeln!(f, "- {flag}")?;
        }

        write!(f, "\n{DISCLAIMER}")
    }
}

/// Render the report text for a row and verdict.
#[must_use]
pub fn build_report(row: &CbcRecord, predicted_class: AnemiaClass) -> String {
    ClinicalReport::build(row, predicted_class).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn microcytic_row() -> CbcRecord {
        CbcRecord {
            rbc: Some(4.0),
            hgb: Some(9.5),
            pcv: Some(30.0),
            mcv: Some(72.0),
            mch: Some(24.0),
            mchc: Some(29.0),
            tlc: Some(6.5),
            plt: Some(250.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_microcytic_scenario() {
        let report = ClinicalReport::build(&microcytic_row(), AnemiaClass::Anemia);
        assert_eq!(report.phenotype, Some(Phenotype::Microcytic));
        assert_eq!(report.hints, vec![SupportingHint::Hypochromic]);

        let text = report.to_string();
        assert!(text.starts_with(ANEMIA_HEADLINE));
        assert!(text.contains("Hb: 9.5 g/dL"));
        assert!(text.contains("MCV: 72.0 fL"));
        assert!(text.contains("Expected phenotype: microcytic"));
        assert!(text.contains("hypochromia"));
        assert!(text.contains("Fecal occult blood test"));
        assert!(text.ends_with(DISCLAIMER));
    }

    #[test]
    fn test_normal_verdict_is_fixed_message() {
        let expected = format!("{NORMAL_HEADLINE}\n{NORMAL_NOTE}");
        assert_eq!(build_report(&microcytic_row(), AnemiaClass::Normal), expected);
        assert_eq!(build_report(&CbcRecord::default(), AnemiaClass::Normal), expected);
    }

    #[test]
    fn test_phenotype_thresholds() {
        assert_eq!(Phenotype::from_mcv(Some(79.9)), Phenotype::Microcytic);
        assert_eq!(Phenotype::from_mcv(Some(80.0)), Phenotype::Normocytic);
        assert_eq!(Phenotype::from_mcv(Some(100.0)), Phenotype::Normocytic);
        assert_eq!(Phenotype::from_mcv(Some(100.1)), Phenotype::Macrocytic);
        assert_eq!(Phenotype::from_mcv(None), Phenotype::Undetermined);
        assert_eq!(Phenotype::from_mcv(Some(f64::NAN)), Phenotype::Undetermined);
    }

    #[test]
    fn test_macrocytic_with_high_rdw() {
        let row = CbcRecord {
            hgb: Some(10.2),
            mcv: Some(108.0),
            mchc: Some(34.0),
            rdw: Some(16.0),
            ..Default::default()
        };
        let report = ClinicalReport::build(&row, AnemiaClass::Anemia);
        assert_eq!(report.hints, vec![SupportingHint::HighRdw]);
        assert!(report.suggested_tests.contains(&"Thyroid function (TSH)"));
        assert_eq!(report.suggested_tests.len(), BASE_TESTS.len() + 3);
    }

    #[test]
    fn test_normocytic_tests() {
        let row = CbcRecord {
            mcv: Some(90.0),
            ..Default::default()
        };
        let text = build_report(&row, AnemiaClass::Anemia);
        assert!(text.contains("normocytic"));
        assert!(text.contains("Renal function"));
        assert!(!text.contains("Supporting notes"));
    }

    #[test]
    fn test_all_optional_values_missing() {
        let text = build_report(&CbcRecord::default(), AnemiaClass::Anemia);
        assert!(text.contains("Expected phenotype: undetermined"));
        assert!(!text.contains("Hb:"));
        assert!(!text.contains("MCV:"));
        assert!(!text.contains("Supporting notes"));
        for t in BASE_TESTS {
            assert!(text.contains(t));
        }
        assert!(text.contains("Red flags"));
    }
}

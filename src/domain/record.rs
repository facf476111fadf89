//! CBC record: one patient lab sample under canonical feature names.

use serde::{Deserialize, Serialize};

use super::features::{Feature, UsedFeatureSet};

/// One lab sample.
///
/// Numeric values are optional so the same type carries partially filled
/// forms; the pipeline only scores records whose required features are all
/// present (see [`CbcRecord::feature_vector`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CbcRecord {
    /// External sample identifier
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Red blood cells (10^6/uL)
    #[serde(rename = "RBC", default)]
    pub rbc: Option<f64>,

    /// Hemoglobin (g/dL)
    #[serde(rename = "HGB", default)]
    pub hgb: Option<f64>,

    /// Packed cell volume (%)
    #[serde(rename = "PCV", default)]
    pub pcv: Option<f64>,

    /// Mean corpuscular volume (fL)
    #[serde(rename = "MCV", default)]
    pub mcv: Option<f64>,

    /// Mean corpuscular hemoglobin (pg)
    #[serde(rename = "MCH", default)]
    pub mch: Option<f64>,

    /// Mean corpuscular hemoglobin concentration (g/dL)
    #[serde(rename = "MCHC", default)]
    pub mchc: Option<f64>,

    /// Total leukocyte count (10^3/uL)
    #[serde(rename = "TLC", default)]
    pub tlc: Option<f64>,

    /// Platelets (10^3/uL)
    #[serde(rename = "PLT", default)]
    pub plt: Option<f64>,

    /// Red cell distribution width (%)
    #[serde(rename = "RDW", default, skip_serializing_if = "Option::is_none")]
    pub rdw: Option<f64>,

    #[serde(rename = "Age", default, skip_serializing_if = "Option::is_none")]
    pub age: Option<f64>,

    /// 0 = female, 1 = male
    #[serde(rename = "Sex", default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<f64>,
}

impl CbcRecord {
    /// Value of a numeric feature; `None` for missing values and for `ID`.
    #[must_use]
    pub fn get(&self, feature: Feature) -> Option<f64> {
        let v = match feature {
            Feature::Rbc => self.rbc,
            Feature::Hgb => self.hgb,
            Feature::Pcv => self.pcv,
            Feature::Mcv => self.mcv,
            Feature::Mch => self.mch,
            Feature::Mchc => self.mchc,
            Feature::Tlc => self.tlc,
            Feature::Plt => self.plt,
            Feature::Rdw => self.rdw,
            Feature::Age => self.age,
            Feature::Sex => self.sex,
            Feature::Id => None,
        };
        v.filter(|x| x.is_finite())
    }

    /// Set a numeric feature. Setting `ID` is a no-op; use the field.
    pub fn set(&mut self, feature: Feature, value: Option<f64>) {
        let slot = match feature {
            Feature::Rbc => &mut self.rbc,
            Feature::Hgb => &mut self.hgb,
            Feature::Pcv => &mut self.pcv,
            Feature::Mcv => &mut self.mcv,
            Feature::Mch => &mut self.mch,
            Feature::Mchc => &mut self.mchc,
            Feature::Tlc => &mut self.tlc,
            Feature::Plt => &mut self.plt,
            Feature::Rdw => &mut self.rdw,
            Feature::Age => &mut self.age,
            Feature::Sex => &mut self.sex,
            Feature::Id => return,
        };
        *slot = value;
    }

    /// Required features that are missing from this record, in set order.
    #[must_use]
    pub fn missing_features(&self, used: &UsedFeatureSet) -> Vec<Feature> {
        used.iter().filter(|f| self.get(*f).is_none()).collect()
    }

    /// Feature values in model order.
    ///
    /// # Errors
    /// Returns the missing features if any required value is absent.
    pub fn feature_vector(&self, used: &UsedFeatureSet) -> Result<Vec<f64>, Vec<Feature>> {
        let missing = self.missing_features(used);
        if !missing.is_empty() {
            return Err(missing);
        }
        Ok(used.iter().filter_map(|f| self.get(f)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CbcRecord {
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
    fn test_feature_vector_order() {
        let used = UsedFeatureSet::standard();
        let v = sample().feature_vector(&used).expect("Should be complete");
        assert_eq!(v, vec![4.0, 9.5, 30.0, 72.0, 24.0, 29.0, 6.5, 250.0]);
    }

    #[test]
    fn test_feature_vector_reports_missing() {
        let mut record = sample();
        record.mcv = None;
        record.set(Feature::Plt, Some(f64::NAN));
        let missing = record
            .feature_vector(&UsedFeatureSet::standard())
            .expect_err("Should be incomplete");
        assert_eq!(missing, vec![Feature::Mcv, Feature::Plt]);
    }

    #[test]
    fn test_deserialize_canonical_names() {
        let record: CbcRecord = serde_json::from_str(
            r#"{"ID":"A7","RBC":4.0,"HGB":9.5,"PCV":30,"MCV":72,"MCH":24,"MCHC":29,"TLC":6.5,"PLT":250}"#,
        )
        .expect("Should parse");
        assert_eq!(record.id.as_deref(), Some("A7"));
        assert_eq!(record.get(Feature::Mcv), Some(72.0));
        assert_eq!(record.rdw, None);
    }
}

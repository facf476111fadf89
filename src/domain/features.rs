//! Canonical CBC feature vocabulary and column reconciliation.
//!
//! Lab exports label the same measurement many ways (`Hb`, `HGB`,
//! `Haemoglobin`, `W.B.C`...). Every accepted spelling is mapped onto one
//! canonical [`Feature`] through an injected [`FeatureAliasTable`].

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical feature names understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Feature {
    /// Red blood cell count
    #[serde(rename = "RBC")]
    Rbc,
    /// Hemoglobin (g/dL)
    #[serde(rename = "HGB")]
    Hgb,
    /// Packed cell volume / hematocrit (%)
    #[serde(rename = "PCV")]
    Pcv,
    /// Mean corpuscular volume (fL)
    #[serde(rename = "MCV")]
    Mcv,
    /// Mean corpuscular hemoglobin (pg)
    #[serde(rename = "MCH")]
    Mch,
    /// Mean corpuscular hemoglobin concentration (g/dL)
    #[serde(rename = "MCHC")]
    Mchc,
    /// Total leukocyte count
    #[serde(rename = "TLC")]
    Tlc,
    /// Platelet count
    #[serde(rename = "PLT")]
    Plt,
    /// Red cell distribution width (%)
    #[serde(rename = "RDW")]
    Rdw,
    /// Age in years
    #[serde(rename = "Age")]
    Age,
    /// Sex, 0 = female, 1 = male
    #[serde(rename = "Sex")]
    Sex,
    /// External sample / record identifier (text)
    #[serde(rename = "ID")]
    Id,
}

impl Feature {
    /// Every canonical feature, in declaration order.
    pub const ALL: [Feature; 12] = [
        Feature::Rbc,
        Feature::Hgb,
        Feature::Pcv,
        Feature::Mcv,
        Feature::Mch,
        Feature::Mchc,
        Feature::Tlc,
        Feature::Plt,
        Feature::Rdw,
        Feature::Age,
        Feature::Sex,
        Feature::Id,
    ];

    /// Canonical spelling used as the column header after reconciliation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rbc => "RBC",
            Self::Hgb => "HGB",
            Self::Pcv => "PCV",
            Self::Mcv => "MCV",
            Self::Mch => "MCH",
            Self::Mchc => "MCHC",
            Self::Tlc => "TLC",
            Self::Plt => "PLT",
            Self::Rdw => "RDW",
            Self::Age => "Age",
            Self::Sex => "Sex",
            Self::Id => "ID",
        }
    }

    /// Whether values of this feature are coerced to numbers.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Id)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s.trim())
            .ok_or_else(|| format!("Unknown canonical feature: {s:?}"))
    }
}

/// Normalize a column label for alias comparison.
///
/// Lower-cases and removes whitespace, periods, hyphens and underscores, so
/// `"W.B.C"`, `"w b c"` and `"wbc"` all compare equal.
#[must_use]
pub fn normalize_label(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '.' | '-' | '_'))
        .collect()
}

/// Mapping from canonical feature to its recognized input spellings.
///
/// Order matters twice: features are resolved in table order, and within a
/// feature the first alias that matches any header wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureAliasTable {
    entries: Vec<(Feature, Vec<String>)>,
}

impl FeatureAliasTable {
    /// Build a table from explicit entries.
    #[must_use]
    pub fn new(entries: Vec<(Feature, Vec<String>)>) -> Self {
        Self { entries }
    }

    /// Iterate `(feature, aliases)` in resolution order.
    pub fn entries(&self) -> impl Iterator<Item = (Feature, &[String])> {
        self.entries.iter().map(|(f, a)| (*f, a.as_slice()))
    }
}

impl Default for FeatureAliasTable {
    fn default() -> Self {
        fn entry(feature: Feature, aliases: &[&str]) -> (Feature, Vec<String>) {
            (feature, aliases.iter().map(|a| (*a).to_string()).collect())
        }

        Self::new(vec![
            entry(
                Feature::Tlc,
                &["tlc", "wbc", "white blood cells", "whitebloodcells", "w.b.c"],
            ),
            entry(Feature::Pcv, &["pcv", "hct", "hematocrit"]),
            entry(Feature::Rbc, &["rbc", "red blood cells", "redbloodcells"]),
            entry(Feature::Hgb, &["hgb", "hb", "hemoglobin", "haemoglobin"]),
            entry(Feature::Mcv, &["mcv"]),
            entry(Feature::Mch, &["mch"]),
            entry(Feature::Mchc, &["mchc"]),
            entry(
                Feature::Plt,
                &["plt", "platelets", "platelet", "platelet count"],
            ),
            entry(
                Feature::Rdw,
                &["rdw", "rdw-cv", "rdw_cv", "rdwcv", "rdw_sd", "rdwsd"],
            ),
            entry(Feature::Age, &["age", "years", "age (y)"]),
            entry(Feature::Sex, &["sex", "gender", "m/f", "male/female"]),
            entry(
                Feature::Id,
                &["id", "sample id", "sampleid", "record id", "patient id", "no"],
            ),
        ])
    }
}

/// Ordered list of canonical features the model was trained on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsedFeatureSet(Vec<Feature>);

impl UsedFeatureSet {
    /// Create a feature set.
    ///
    /// # Errors
    /// Returns error if the list is empty, contains duplicates, or names a
    /// non-numeric feature.
    pub fn new(features: Vec<Feature>) -> Result<Self, String> {
        if features.is_empty() {
            return Err("Feature list is empty".to_string());
        }
        let mut seen = HashSet::new();
        for f in &features {
            if !f.is_numeric() {
                return Err(format!("{f} cannot be used as a model feature"));
            }
            if !seen.insert(*f) {
                return Err(format!("Duplicate feature in list: {f}"));
            }
        }
        Ok(Self(features))
    }

    /// Parse canonical names (as stored in `used_features.json`).
    ///
    /// # Errors
    /// Returns error on an unknown name or an invalid list.
    pub fn from_names<I, S>(names: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let features = names
            .into_iter()
            .map(|n| n.as_ref().parse::<Feature>())
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(features)
    }

    /// The eight core CBC indices.
    #[must_use]
    pub fn standard() -> Self {
        Self(vec![
            Feature::Rbc,
            Feature::Hgb,
            Feature::Pcv,
            Feature::Mcv,
            Feature::Mch,
            Feature::Mchc,
            Feature::Tlc,
            Feature::Plt,
        ])
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Feature] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        self.0.iter().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn contains(&self, feature: Feature) -> bool {
        self.0.contains(&feature)
    }
}

/// A header that also matched a feature already claimed by another column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AliasConflict {
    pub feature: Feature,
    /// Header that was mapped to `feature`
    pub kept: String,
    /// Header that was left unmapped
    pub ignored: String,
}

impl fmt::Display for AliasConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} and {:?} both denote {}; using {:?}",
            self.kept, self.ignored, self.feature, self.kept
        )
    }
}

/// Result of reconciling input headers with the alias table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// `(column index, canonical feature)` in resolution order
    pub renames: Vec<(usize, Feature)>,
    pub conflicts: Vec<AliasConflict>,
}

impl Reconciliation {
    /// Canonical feature assigned to a column, if any.
    #[must_use]
    pub fn feature_of(&self, column: usize) -> Option<Feature> {
        self.renames
            .iter()
            .find(|(idx, _)| *idx == column)
            .map(|(_, f)| *f)
    }

    /// Column index that carries a feature, if any.
    #[must_use]
    pub fn column_of(&self, feature: Feature) -> Option<usize> {
        self.renames
            .iter()
            .find(|(_, f)| *f == feature)
            .map(|(idx, _)| *idx)
    }

    /// Headers after renaming; unmatched headers pass through unchanged.
    #[must_use]
    pub fn renamed_headers(&self, headers: &[String]) -> Vec<String> {
        headers
            .iter()
            .enumerate()
            .map(|(idx, h)| match self.feature_of(idx) {
                Some(f) => f.as_str().to_string(),
                None => h.clone(),
            })
            .collect()
    }
}

/// Map arbitrary headers onto canonical features.
///
/// First match wins per feature. Headers that also match an already mapped
/// feature are recorded as conflicts and left unmapped.
#[must_use]
pub fn reconcile_columns(headers: &[String], aliases: &FeatureAliasTable) -> Reconciliation {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_label(h)).collect();
    let mut claimed = vec![false; headers.len()];
    let mut out = Reconciliation::default();

    for (feature, variants) in aliases.entries() {
        let keys: Vec<String> = variants.iter().map(|v| normalize_label(v)).collect();

        let hit = keys.iter().find_map(|key| {
            normalized
                .iter()
                .enumerate()
                .find(|(idx, n)| !claimed[*idx] && *n == key)
                .map(|(idx, _)| idx)
        });

        let Some(idx) = hit else { continue };
        claimed[idx] = true;
        out.renames.push((idx, feature));

        for (other, n) in normalized.iter().enumerate() {
            if !claimed[other] && keys.contains(n) {
                out.conflicts.push(AliasConflict {
                    feature,
                    kept: headers[idx].clone(),
                    ignored: headers[other].clone(),
                });
            }
        }
    }

    out
}

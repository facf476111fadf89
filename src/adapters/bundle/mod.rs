//! Model bundle adapter: JSON assets on disk plus a logistic scorer.
//!
//! A bundle directory holds three assets:
//! - `used_features.json`: ordered canonical feature names
//! - `scaler.json`: `{ "mean": [...], "scale": [...] }`
//! - `model.json`: `{ "kind": "logistic", "coefficients": [...], "intercept": x }`,
//!   optionally with `"threshold": 0.5` (no other threshold loads)
//!
//! # Integrity
//!
//! An optional `manifest.json` binds the assets by SHA-256. When it is
//! present every listed file must hash to its recorded digest and all three
//! assets must be listed. With `require_manifest` set, a bundle without a
//! manifest is refused. The `seal_bundle` binary writes the manifest.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{AnemiaClass, PipelineError, StandardScaler, UsedFeatureSet};
use crate::ports::{ModelBundle, Score, Scorer, ScorerError};

pub const USED_FEATURES_FILE: &str = "used_features.json";
pub const SCALER_FILE: &str = "scaler.json";
pub const MODEL_FILE: &str = "model.json";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Assets every manifest must bind.
pub const BUNDLE_ASSETS: [&str; 3] = [USED_FEATURES_FILE, SCALER_FILE, MODEL_FILE];

const MANIFEST_VERSION: u32 = 1;

/// Error type for bundle loading.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid {file}: {message}")]
    Format { file: &'static str, message: String },

    #[error("Inconsistent bundle: {0}")]
    Shape(String),

    #[error("Manifest rejected: {0}")]
    Manifest(String),

    #[error("File hash mismatch for {0}")]
    HashMismatch(String),
}

impl From<BundleError> for PipelineError {
    fn from(e: BundleError) -> Self {
        PipelineError::ModelUnavailable(e.to_string())
    }
}

/// SHA-256 digests of the bundle assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub version: u32,
    pub files: BTreeMap<String, String>,
}

impl BundleManifest {
    /// Hash the given files of `dir` into a new manifest.
    ///
    /// # Errors
    /// Returns `BundleError::Io` if a file cannot be read.
    pub fn seal(dir: &Path, files: &[&str]) -> Result<Self, BundleError> {
        let mut map = BTreeMap::new();
        for rel in files {
            let bytes = read_bytes(&dir.join(rel))?;
            map.insert((*rel).to_string(), sha256_hex(&bytes));
        }
        Ok(Self {
            version: MANIFEST_VERSION,
            files: map,
        })
    }

    /// Write the manifest as pretty JSON into `dir`.
    ///
    /// # Errors
    /// Returns `BundleError::Io` if the file cannot be written.
    pub fn write(&self, dir: &Path) -> Result<PathBuf, BundleError> {
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(self).map_err(|e| BundleError::Format {
            file: MANIFEST_FILE,
            message: e.to_string(),
        })?;
        fs::write(&path, json).map_err(|source| BundleError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Check version, coverage and every recorded digest.
    ///
    /// # Errors
    /// Returns `Manifest` for structural problems and `HashMismatch` for a
    /// file whose contents changed.
    pub fn verify(&self, dir: &Path) -> Result<(), BundleError> {
        if self.version != MANIFEST_VERSION {
            return Err(BundleError::Manifest(format!(
                "unsupported manifest version: {}",
                self.version
            )));
        }
        for asset in BUNDLE_ASSETS {
            if !self.files.contains_key(asset) {
                return Err(BundleError::Manifest(format!("{asset} is not listed")));
            }
        }
        for (rel, expected_hex) in &self.files {
            if Path::new(rel).components().count() != 1 {
                return Err(BundleError::Manifest(format!(
                    "entry {rel} must be a plain file name"
                )));
            }
            let bytes = read_bytes(&dir.join(rel))?;
            if !constant_time_eq_str(&sha256_hex(&bytes), &expected_hex.to_lowercase()) {
                return Err(BundleError::HashMismatch(rel.clone()));
            }
        }
        Ok(())
    }
}

/// Serialized classifier parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelSpec {
    Logistic(LogisticModel),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    0.5
}

/// Logistic regression over standardized features.
///
/// `p1 = sigmoid(w . x + b)`; class 1 when `p1 >= 0.5`. The reported class
/// is always the more probable one, so `threshold` must stay at 0.5.
#[derive(Debug, Clone)]
pub struct LogisticScorer {
    model: LogisticModel,
}

impl LogisticScorer {
    /// Create a scorer from fitted parameters.
    ///
    /// # Errors
    /// Returns a message for empty or non-finite coefficients, or a
    /// threshold other than 0.5.
    pub fn new(model: LogisticModel) -> Result<Self, String> {
        if model.coefficients.is_empty() {
            return Err("model has no coefficients".into());
        }
        if model.coefficients.iter().any(|w| !w.is_finite()) || !model.intercept.is_finite() {
            return Err("model parameters must be finite".into());
        }
        if model.threshold != default_threshold() {
            return Err(format!(
                "threshold {} is not supported; the predicted class must be the more probable one (0.5)",
                model.threshold
            ));
        }
        Ok(Self { model })
    }
}

impl Scorer for LogisticScorer {
    fn n_features(&self) -> usize {
        self.model.coefficients.len()
    }

    fn score(&self, features: &[f64]) -> Result<Score, ScorerError> {
        if features.len() != self.n_features() {
            return Err(ScorerError::Shape {
                expected: self.n_features(),
                got: features.len(),
            });
        }
        if features.iter().any(|x| !x.is_finite()) {
            return Err(ScorerError::NonFinite);
        }

        let logit = self
            .model
            .coefficients
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.model.intercept;
        if logit.is_nan() {
            return Err(ScorerError::NonFinite);
        }
        let p1 = sigmoid(logit);

        let class = if p1 >= self.model.threshold {
            AnemiaClass::Anemia
        } else {
            AnemiaClass::Normal
        };
        Ok(Score {
            class,
            probabilities: [1.0 - p1, p1],
        })
    }
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

#[derive(Debug, Deserialize)]
struct ScalerFile {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

/// Reads and validates a bundle directory.
#[derive(Debug, Clone)]
pub struct BundleLoader {
    dir: PathBuf,
    require_manifest: bool,
}

impl BundleLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            require_manifest: false,
        }
    }

    /// Refuse bundles without `manifest.json`.
    #[must_use]
    pub fn require_manifest(mut self, require: bool) -> Self {
        self.require_manifest = require;
        self
    }

    /// Load the feature list, scaler and classifier.
    ///
    /// # Errors
    /// Any unreadable, malformed, inconsistent or tampered asset.
    pub fn load(&self) -> Result<ModelBundle, BundleError> {
        self.verify_manifest()?;

        let names: Vec<String> = read_json(&self.dir, USED_FEATURES_FILE)?;
        let used_features =
            UsedFeatureSet::from_names(&names).map_err(|message| BundleError::Format {
                file: USED_FEATURES_FILE,
                message,
            })?;

        let scaler: ScalerFile = read_json(&self.dir, SCALER_FILE)?;
        let scaler = StandardScaler::new(scaler.mean, scaler.scale).map_err(|message| {
            BundleError::Format {
                file: SCALER_FILE,
                message,
            }
        })?;

        let ModelSpec::Logistic(model) = read_json(&self.dir, MODEL_FILE)?;
        let scorer = LogisticScorer::new(model).map_err(|message| BundleError::Format {
            file: MODEL_FILE,
            message,
        })?;

        let bundle = ModelBundle::new(used_features, scaler, Arc::new(scorer))
            .map_err(BundleError::Shape)?;

        tracing::info!(
            "Loaded model bundle from {:?} (n_features={})",
            self.dir,
            bundle.used_features.len()
        );
        Ok(bundle)
    }

    fn verify_manifest(&self) -> Result<(), BundleError> {
        let path = self.dir.join(MANIFEST_FILE);
        if !path.exists() {
            if self.require_manifest {
                return Err(BundleError::Manifest(format!(
                    "{MANIFEST_FILE} is required but missing from {:?}",
                    self.dir
                )));
            }
            tracing::warn!("Loading model bundle without {} from {:?}", MANIFEST_FILE, self.dir);
            return Ok(());
        }

        let manifest: BundleManifest = read_json(&self.dir, MANIFEST_FILE)?;
        manifest.verify(&self.dir)?;
        tracing::debug!("Manifest verified ({} file(s))", manifest.files.len());
        Ok(())
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, BundleError> {
    fs::read(path).map_err(|source| BundleError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: serde::de::DeserializeOwned>(
    dir: &Path,
    file: &'static str,
) -> Result<T, BundleError> {
    let bytes = read_bytes(&dir.join(file))?;
    serde_json::from_slice(&bytes).map_err(|e| BundleError::Format {
        file,
        message: e.to_string(),
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// Constant-time compare for ASCII strings (SHA-256 hex digests).
fn constant_time_eq_str(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

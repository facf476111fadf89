//! Fitted standard scaler.

use serde::{Deserialize, Serialize};

/// Per-feature standardization `(x - mean) / scale`.
///
/// A zero scale is treated as 1, the convention of a fitted scaler on a
/// constant column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Create a scaler, checking that both vectors agree in length.
    ///
    /// # Errors
    /// Returns a message when the lengths differ or a value is non-finite.
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Result<Self, String> {
        let scaler = Self { mean, scale };
        scaler.validate()?;
        Ok(scaler)
    }

    /// Check shape and finiteness of the fitted parameters.
    ///
    /// # Errors
    /// Returns a message describing the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.mean.len() != self.scale.len() {
            return Err(format!(
                "scaler mean has {} entries but scale has {}",
                self.mean.len(),
                self.scale.len()
            ));
        }
        if self.mean.iter().chain(&self.scale).any(|v| !v.is_finite()) {
            return Err("scaler parameters must be finite".to_string());
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// Standardize one feature vector.
    ///
    /// # Errors
    /// Returns a message when `x` has the wrong length.
    pub fn transform(&self, x: &[f64]) -> Result<Vec<f64>, String> {
        if x.len() != self.len() {
            return Err(format!(
                "expected {} features, got {}",
                self.len(),
                x.len()
            ));
        }
        Ok(x.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| {
                let s = if *s == 0.0 { 1.0 } else { *s };
                (v - m) / s
            })
            .collect())
    }
}

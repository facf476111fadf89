//! Environment-driven settings.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `HEMASENSE_MODEL_DIR` | `models` | model bundle directory |
//! | `HEMASENSE_DB_PATH` | unset | SQLite file; unset disables persistence |
//! | `HEMASENSE_REQUIRE_MANIFEST` | `false` | refuse bundles without `manifest.json` |
//! | `HEMASENSE_ALIAS_CONFLICTS` | `warn` | `warn` or `reject` duplicate feature columns |
//! | `HEMASENSE_INCLUDE_REPORTS` | `true` | attach clinical reports to results |
//!
//! Booleans are true for `1`, `true`, `TRUE`, `yes` or `YES`; any other
//! value is false.

use std::path::PathBuf;

use crate::domain::ConflictPolicy;

pub const MODEL_DIR_ENV: &str = "HEMASENSE_MODEL_DIR";
pub const DB_PATH_ENV: &str = "HEMASENSE_DB_PATH";
pub const REQUIRE_MANIFEST_ENV: &str = "HEMASENSE_REQUIRE_MANIFEST";
pub const ALIAS_CONFLICTS_ENV: &str = "HEMASENSE_ALIAS_CONFLICTS";
pub const INCLUDE_REPORTS_ENV: &str = "HEMASENSE_INCLUDE_REPORTS";

const DEFAULT_MODEL_DIR: &str = "models";

/// Error type for configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?} (expected {expected})")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub model_dir: PathBuf,
    pub db_path: Option<PathBuf>,
    pub require_manifest: bool,
    pub alias_conflicts: ConflictPolicy,
    pub include_reports: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            db_path: None,
            require_manifest: false,
            alias_conflicts: ConflictPolicy::Warn,
            include_reports: true,
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "yes" | "YES")
}

impl Settings {
    /// Read settings from the process environment.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` for an unrecognized conflict policy.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` for an unrecognized conflict policy.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let alias_conflicts = match non_empty(ALIAS_CONFLICTS_ENV) {
            None => defaults.alias_conflicts,
            Some(v) => match v.trim().to_lowercase().as_str() {
                "warn" => ConflictPolicy::Warn,
                "reject" => ConflictPolicy::Reject,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: ALIAS_CONFLICTS_ENV,
                        value: v,
                        expected: "warn or reject",
                    })
                }
            },
        };

        Ok(Self {
            model_dir: non_empty(MODEL_DIR_ENV).map_or(defaults.model_dir, PathBuf::from),
            db_path: non_empty(DB_PATH_ENV).map(PathBuf::from),
            require_manifest: non_empty(REQUIRE_MANIFEST_ENV)
                .map_or(defaults.require_manifest, |v| parse_bool(&v)),
            alias_conflicts,
            include_reports: non_empty(INCLUDE_REPORTS_ENV)
                .map_or(defaults.include_reports, |v| parse_bool(&v)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Settings::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(settings(&[]).expect("Should parse"), Settings::default());
    }

    #[test]
    fn test_overrides() {
        let s = settings(&[
            (MODEL_DIR_ENV, "/opt/bundle"),
            (DB_PATH_ENV, "/var/lib/hemasense.db"),
            (REQUIRE_MANIFEST_ENV, "YES"),
            (ALIAS_CONFLICTS_ENV, "Reject"),
            (INCLUDE_REPORTS_ENV, "0"),
        ])
        .expect("Should parse");

        assert_eq!(s.model_dir, PathBuf::from("/opt/bundle"));
        assert_eq!(s.db_path, Some(PathBuf::from("/var/lib/hemasense.db")));
        assert!(s.require_manifest);
        assert_eq!(s.alias_conflicts, ConflictPolicy::Reject);
        assert!(!s.include_reports);
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let s = settings(&[(DB_PATH_ENV, "  "), (INCLUDE_REPORTS_ENV, "")]).expect("Should parse");
        assert!(s.db_path.is_none());
        assert!(s.include_reports);
    }

    #[test]
    fn test_invalid_policy() {
        let err = settings(&[(ALIAS_CONFLICTS_ENV, "ignore")]).expect_err("Should fail");
        assert!(matches!(err, ConfigError::InvalidValue { var: ALIAS_CONFLICTS_ENV, .. }));
    }
}

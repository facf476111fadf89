//! Table preparation: reconcile headers, normalize sex, coerce, filter.
//!
//! Turns a raw [`LabTable`] into dense [`CbcRecord`]s ready for scoring.
//! Column-level problems are errors; value-level problems only drop rows.
//! Only columns mapped to a canonical feature are coerced; anything else
//! (free-text notes, a `Diagnosis` label column) is left out of the records.

use std::collections::BTreeSet;

use super::error::PipelineError;
use super::features::{reconcile_columns, Feature, FeatureAliasTable, Reconciliation, UsedFeatureSet};
use super::record::CbcRecord;
use super::table::{parse_numeric_or_missing, Cell, LabTable};

/// What to do when several headers denote the same feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Keep the first match and log a warning
    #[default]
    Warn,
    /// Fail the batch with `AmbiguousColumns`
    Reject,
}

/// Fully valid rows, indexed from 0 in input order.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub records: Vec<CbcRecord>,
    /// Rows removed for missing required values
    pub dropped_rows: usize,
    pub reconciliation: Reconciliation,
}

impl PreparedBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Normalize a sex/gender column to 0 (female) / 1 (male) / missing.
#[must_use]
pub fn normalize_sex_column(cells: &[Cell]) -> Vec<Option<f64>> {
    let holds_text = cells
        .iter()
        .any(|c| matches!(c, Cell::Text(s) if s.trim().parse::<f64>().is_err()));

    if holds_text {
        return cells
            .iter()
            .map(|c| match c.as_text()?.to_uppercase().as_str() {
                "F" | "FEMALE" | "0" => Some(0.0),
                "M" | "MALE" | "1" => Some(1.0),
                _ => None,
            })
            .collect();
    }

    let values: Vec<Option<f64>> = cells.iter().map(parse_numeric_or_missing).collect();
    let observed: BTreeSet<u64> = values.iter().flatten().map(|v| v.to_bits()).collect();
    let lies_in = |allowed: [f64; 2]| {
        observed
            .iter()
            .all(|bits| allowed.iter().any(|a| a.to_bits() == *bits))
    };

    if lies_in([0.0, 1.0]) {
        values
    } else if lies_in([1.0, 2.0]) {
        values.into_iter().map(|v| v.map(|x| x - 1.0)).collect()
    } else {
        values
    }
}

/// Reconcile, coerce and filter a raw table.
///
/// # Errors
/// - `AmbiguousColumns` when `policy` is `Reject` and headers conflict
/// - `MissingColumns` when a required feature has no column
/// - `EmptyResult` when no row survives filtering
pub fn prepare_table(
    table: &LabTable,
    aliases: &FeatureAliasTable,
    used: &UsedFeatureSet,
    policy: ConflictPolicy,
) -> Result<PreparedBatch, PipelineError> {
    let reconciliation = reconcile_columns(table.headers(), aliases);

    for conflict in &reconciliation.conflicts {
        tracing::warn!("Column conflict: {}", conflict);
    }
    if policy == ConflictPolicy::Reject && !reconciliation.conflicts.is_empty() {
        return Err(PipelineError::AmbiguousColumns(
            reconciliation.conflicts.iter().map(ToString::to_string).collect(),
        ));
    }

    let missing: Vec<Feature> = used
        .iter()
        .filter(|f| reconciliation.column_of(*f).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::MissingColumns(missing));
    }

    let mut records = vec![CbcRecord::default(); table.len()];
    for &(idx, feature) in &reconciliation.renames {
        let cells = table.column(idx);
        match feature {
            Feature::Id => {
                for (record, cell) in records.iter_mut().zip(&cells) {
                    record.id = cell.as_text();
                }
            }
            Feature::Sex => {
                for (record, v) in records.iter_mut().zip(normalize_sex_column(&cells)) {
                    record.sex = v;
                }
            }
            _ => {
                for (record, cell) in records.iter_mut().zip(&cells) {
                    record.set(feature, parse_numeric_or_missing(cell));
                }
            }
        }
    }

    let total_rows = records.len();
    let records: Vec<CbcRecord> = records
        .into_iter()
        .filter(|r| r.missing_features(used).is_empty())
        .collect();
    let dropped_rows = total_rows - records.len();

    tracing::debug!(
        "Prepared {} of {} row(s) ({} dropped, {} column(s) mapped)",
        records.len(),
        total_rows,
        dropped_rows,
        reconciliation.renames.len()
    );

    if records.is_empty() {
        return Err(PipelineError::EmptyResult { total_rows });
    }

    Ok(PreparedBatch {
        records,
        dropped_rows,
        reconciliation,
    })
}

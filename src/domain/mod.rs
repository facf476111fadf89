//! Domain layer: Core business types and logic.
//!
//! Pure types and functions for CBC input: canonical features and their
//! aliases, the raw lab table, table preparation, predictions and the
//! rule-based clinical report. Nothing here touches the filesystem.

mod analysis;
mod error;
mod features;
mod prediction;
mod prepare;
mod record;
pub mod report;
mod scaler;
mod table;

pub use analysis::{AnalysisSource, CbcAnalysis};
pub use error::PipelineError;
pub use features::{
    normalize_label, reconcile_columns, AliasConflict, Feature, FeatureAliasTable,
    Reconciliation, UsedFeatureSet,
};
pub use prediction::{
    AnemiaClass, ClassProbabilities, ConfidenceBand, PredictionOutput, PredictionResult,
};
pub use prepare::{normalize_sex_column, prepare_table, ConflictPolicy, PreparedBatch};
pub use record::CbcRecord;
pub use report::{build_report, ClinicalReport, Phenotype, SupportingHint};
pub use scaler::StandardScaler;
pub use table::{parse_numeric_or_missing, Cell, LabTable};

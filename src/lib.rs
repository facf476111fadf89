//! # Hemasense
//!
//! CBC anemia inference pipeline.
//!
//! This crate provides:
//! - Header reconciliation and validation for loosely labelled CBC tables
//! - Scoring with a pre-trained binary classifier loaded from a model bundle
//! - A rule-based clinical report derived from the lab values and verdict
//! - Optional local persistence of analyses
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core business types (features, records, predictions, reports)
//! - `ports`: Trait definitions for external operations (scorer, storage)
//! - `adapters`: Concrete implementations (model bundle, CSV, SQLite, log sanitizer)
//! - `application`: Use cases orchestrating domain and ports
//! - `config`: Environment-driven settings

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use application::{AnalysisOutcome, CbcInferenceService};
pub use domain::{AnemiaClass, CbcRecord, PipelineError, PredictionResult};

/// Result type for Hemasense operations
pub type Result<T> = std::result::Result<T, HemasenseError>;

/// Main error type for Hemasense
#[derive(Debug, thiserror::Error)]
pub enum HemasenseError {
    #[error(transparent)]
    Pipeline(#[from] domain::PipelineError),

    #[error("Storage operation failed: {0}")]
    Storage(#[from] adapters::StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

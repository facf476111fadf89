//! Application layer: Use cases and services.
//!
//! This module orchestrates domain logic with ports to implement
//! the core use cases of the application.

mod inference;
mod model;

pub use inference::{AnalysisOutcome, CbcInferenceService, CsvUpload, ManualEntry, UploadContext};
pub use model::LazyModel;

//! Storage port: Trait for persistent storage operations.
//!
//! This trait abstracts the storage backend (SQLite) from the application logic.

use crate::domain::CbcAnalysis;

/// Trait for analysis persistence.
pub trait Storage: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Save an analysis.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn save_analysis(&self, analysis: &CbcAnalysis) -> Result<(), Self::Error>;

    /// Load one analysis by ID.
    ///
    /// # Returns
    /// `None` if no analysis has that ID.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn load_analysis(&self, id: &str) -> Result<Option<CbcAnalysis>, Self::Error>;

    /// Load recent analyses (up to `limit`), newest first.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn load_recent_analyses(&self, limit: usize) -> Result<Vec<CbcAnalysis>, Self::Error>;

    /// Load every analysis recorded for a patient, newest first.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn load_patient_analyses(&self, patient_id: &str) -> Result<Vec<CbcAnalysis>, Self::Error>;

    /// Get the total count of analyses.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn count_analyses(&self) -> Result<usize, Self::Error>;

    /// Delete an analysis by ID.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn delete_analysis(&self, id: &str) -> Result<(), Self::Error>;

    /// Clear all analyses.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn clear_all(&self) -> Result<(), Self::Error>;
}

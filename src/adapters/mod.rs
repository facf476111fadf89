//! Adapters layer: Concrete implementations of ports.
//!
//! These modules contain the actual integration with external libraries:
//! - `bundle`: JSON model bundle on disk and the logistic scorer
//! - `tabular`: CSV (`csv`) and JSON record readers
//! - `sqlite`: SQLite for local storage
//! - `sanitize`: identifier filtering for logs

pub mod bundle;
pub mod sanitize;
pub mod sqlite;
pub mod tabular;

pub use bundle::{BundleError, BundleLoader, LogisticScorer};
pub use sqlite::{SqliteStorage, StorageError};

//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the application and external systems (model runtime, storage).

mod scorer;
mod storage;

pub use scorer::{ModelBundle, Score, Scorer, ScorerError};
pub use storage::Storage;

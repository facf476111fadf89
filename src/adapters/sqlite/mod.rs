//! SQLite adapter: Implementation of Storage.
//!
//! Provides local persistence for CBC analyses.
//!
//! # Mutex Behavior
//!
//! The connection is protected by a `Mutex`. A poisoned mutex (from a panic
//! in another thread) surfaces as `StorageError::LockPoisoned` on every
//! later call instead of risking writes from a half-finished operation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::domain::{AnalysisSource, AnemiaClass, CbcAnalysis, ClassProbabilities};
use crate::ports::Storage;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

const SELECT_COLUMNS: &str = r"
    SELECT id, patient_id, uploaded_by, source, row_index, predicted_class,
           confidence, prob_normal, prob_anemia, report, notes, created_at
    FROM cbc_analyses
";

/// SQLite storage adapter.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Create a new SQLite storage with the given database path.
    ///
    /// # Errors
    /// Returns error if database cannot be opened or initialized.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite database (for testing).
    ///
    /// # Errors
    /// Returns error if database cannot be created.
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS cbc_analyses (
                id TEXT PRIMARY KEY,
                patient_id TEXT,
                uploaded_by TEXT,
                source TEXT NOT NULL,
                row_index INTEGER NOT NULL,
                predicted_class INTEGER NOT NULL CHECK (predicted_class IN (0, 1)),
                confidence REAL NOT NULL,
                prob_normal REAL NOT NULL,
                prob_anemia REAL NOT NULL,
                report TEXT,
                notes TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cbc_analyses_created
                ON cbc_analyses(created_at DESC);

            CREATE INDEX IF NOT EXISTS idx_cbc_analyses_patient
                ON cbc_analyses(patient_id);
            ",
        )?;

        Ok(())
    }

    fn analysis_from_row(row: &Row<'_>) -> rusqlite::Result<CbcAnalysis> {
        let source: String = row.get(3)?;
        let row_index: i64 = row.get(4)?;
        let predicted_class: i64 = row.get(5)?;
        let created_at_str: String = row.get(11)?;

        let predicted_class = u8::try_from(predicted_class)
            .ok()
            .and_then(AnemiaClass::from_code)
            .ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Integer,
                    format!("invalid class code {predicted_class}").into(),
                )
            })?;

        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, Box::new(e))
            })?;

        Ok(CbcAnalysis {
            id: row.get(0)?,
            patient_id: row.get(1)?,
            uploaded_by: row.get(2)?,
            source: AnalysisSource::parse(&source),
            row_index: usize::try_from(row_index).unwrap_or_default(),
            predicted_class,
            confidence: row.get(6)?,
            probabilities: ClassProbabilities::new(row.get(7)?, row.get(8)?),
            report: row.get(9)?,
            notes: row.get(10)?,
            created_at,
        })
    }

    fn query_analyses<P: rusqlite::Params>(
        &self,
        clause: &str,
        params: P,
    ) -> Result<Vec<CbcAnalysis>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} {clause}"))?;
        let analyses = stmt
            .query_map(params, Self::analysis_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(analyses)
    }
}

impl Storage for SqliteStorage {
    type Error = StorageError;

    fn save_analysis(&self, analysis: &CbcAnalysis) -> Result<(), Self::Error> {
        let conn = self.lock()?;
        let row_index = i64::try_from(analysis.row_index)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        conn.execute(
            r"
            INSERT INTO cbc_analyses (
                id, patient_id, uploaded_by, source, row_index, predicted_class,
                confidence, prob_normal, prob_anemia, report, notes, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ",
            params![
                analysis.id,
                analysis.patient_id,
                analysis.uploaded_by,
                analysis.source.as_str(),
                row_index,
                i64::from(analysis.predicted_class.code()),
                analysis.confidence,
                analysis.probabilities.normal,
                analysis.probabilities.anemia,
                analysis.report,
                analysis.notes,
                analysis.created_at.to_rfc3339(),
            ],
        )?;

        tracing::debug!("Saved analysis {} to storage", analysis.id);
        Ok(())
    }

    fn load_analysis(&self, id: &str) -> Result<Option<CbcAnalysis>, Self::Error> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
        Ok(stmt
            .query_row(params![id], Self::analysis_from_row)
            .optional()?)
    }

    fn load_recent_analyses(&self, limit: usize) -> Result<Vec<CbcAnalysis>, Self::Error> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_analyses(
            "ORDER BY created_at DESC, row_index ASC LIMIT ?1",
            params![limit],
        )
    }

    fn load_patient_analyses(&self, patient_id: &str) -> Result<Vec<CbcAnalysis>, Self::Error> {
        self.query_analyses(
            "WHERE patient_id = ?1 ORDER BY created_at DESC, row_index ASC",
            params![patient_id],
        )
    }

    fn count_analyses(&self) -> Result<usize, Self::Error> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cbc_analyses", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn delete_analysis(&self, id: &str) -> Result<(), Self::Error> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM cbc_analyses WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn clear_all(&self) -> Result<(), Self::Error> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM cbc_analyses", [])?;
        tracing::warn!("Cleared all analyses from storage");
        Ok(())
    }
}

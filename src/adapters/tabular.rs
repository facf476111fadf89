//! Tabular readers: CSV bytes and JSON records into a [`LabTable`].
//!
//! Readers keep every value as raw text; typing happens during table
//! preparation. Only structural problems (no header row, broken quoting,
//! invalid UTF-8) are errors.

use serde_json::{Map, Value};

use crate::domain::{Cell, LabTable, PipelineError};

/// Tokens read as a missing value, compared case-sensitively after trimming.
const NA_TOKENS: [&str; 9] = ["", "NA", "N/A", "NaN", "nan", "null", "NULL", "#N/A", "None"];

fn cell_from_raw(raw: &str) -> Cell {
    let trimmed = raw.trim();
    if NA_TOKENS.contains(&trimmed) {
        Cell::Missing
    } else {
        Cell::from_text(trimmed)
    }
}

/// Read CSV bytes with a header row.
///
/// Short rows are padded with missing cells and long rows truncated to the
/// header width. A file with a header row but no data rows yields an empty
/// table.
///
/// # Errors
/// Returns `PipelineError::InvalidInput` when there is no header row or the
/// bytes are not well-formed CSV.
pub fn read_csv(bytes: &[u8]) -> Result<LabTable, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| PipelineError::InvalidInput(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.iter().all(String::is_empty) {
        return Err(PipelineError::InvalidInput("No header row found".into()));
    }

    let mut table = LabTable::new(headers);
    for record in reader.records() {
        let record = record.map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        table.push_row(record.iter().map(cell_from_raw).collect());
    }

    tracing::debug!(
        "Read CSV with {} column(s) and {} row(s)",
        table.headers().len(),
        table.len()
    );
    Ok(table)
}

/// One-row table from a JSON object of label → value.
///
/// Keys keep their original spelling and input order so they go through
/// alias reconciliation like CSV headers.
#[must_use]
pub fn table_from_json_record(record: &Map<String, Value>) -> LabTable {
    let mut table = LabTable::new(record.keys().cloned().collect());
    let row = record
        .values()
        .map(|v| match v {
            Value::Null => Cell::Missing,
            Value::Number(n) => n.as_f64().map_or(Cell::Missing, Cell::Number),
            Value::String(s) => cell_from_raw(s),
            other => Cell::Text(other.to_string()),
        })
        .collect();
    table.push_row(row);
    table
}

/// Parse a JSON object and convert it with [`table_from_json_record`].
///
/// # Errors
/// Returns `PipelineError::InvalidInput` unless the text is a JSON object.
pub fn read_json_record(json: &str) -> Result<LabTable, PipelineError> {
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(map)) => Ok(table_from_json_record(&map)),
        Ok(_) => Err(PipelineError::InvalidInput(
            "Expected a JSON object of lab values".into(),
        )),
        Err(e) => Err(PipelineError::InvalidInput(e.to_string())),
    }
}

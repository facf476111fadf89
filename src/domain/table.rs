//! Raw tabular lab input.
//!
//! A [`LabTable`] is what arrives from a CSV upload or a form: arbitrary
//! headers and loosely typed cells. Nothing here fails on bad values; they
//! degrade to missing when parsed.

use super::features::Feature;
use super::record::CbcRecord;

/// One raw cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Missing,
    Number(f64),
    Text(String),
}

impl Cell {
    /// Build a cell from raw text; blank text is missing.
    #[must_use]
    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Self::Missing
        } else {
            Self::Text(trimmed.to_string())
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Text form of the cell. Integral numbers render without a fraction.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Missing => None,
            Self::Number(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 => {
                Some(format!("{}", *v as i64))
            }
            Self::Number(v) => Some(v.to_string()),
            Self::Text(s) => Some(s.trim().to_string()),
        }
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<Option<f64>> for Cell {
    fn from(v: Option<f64>) -> Self {
        v.map_or(Self::Missing, Self::Number)
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Self::from_text(s)
    }
}

/// Parse a cell as a finite number; anything else is missing.
///
/// This is the single coercion primitive of the pipeline. It never fails.
#[must_use]
pub fn parse_numeric_or_missing(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Missing => None,
        Cell::Number(v) => Some(*v).filter(|v| v.is_finite()),
        Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

/// Headers plus rows of cells. Every row has exactly one cell per header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabTable {
    headers: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl LabTable {
    /// Create an empty table with the given headers.
    #[must_use]
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Append a row, padding with missing cells or truncating to the header width.
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.headers.len(), Cell::Missing);
        self.rows.push(row);
    }

    /// Table with canonical headers holding the given records, one row each.
    #[must_use]
    pub fn from_records(records: &[CbcRecord]) -> Self {
        let mut table = Self::new(Feature::ALL.iter().map(|f| f.as_str().to_string()).collect());
        for record in records {
            let row = Feature::ALL
                .iter()
                .map(|f| match f {
                    Feature::Id => record
                        .id
                        .as_deref()
                        .map_or(Cell::Missing, Cell::from_text),
                    _ => Cell::from(record.get(*f)),
                })
                .collect();
            table.push_row(row);
        }
        table
    }

    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Number of data rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All cells of one column, top to bottom.
    #[must_use]
    pub fn column(&self, idx: usize) -> Vec<Cell> {
        self.rows
            .iter()
            .map(|r| r.get(idx).cloned().unwrap_or(Cell::Missing))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric_or_missing() {
        assert_eq!(parse_numeric_or_missing(&Cell::Number(4.2)), Some(4.2));
        assert_eq!(parse_numeric_or_missing(&Cell::from_text(" 9.5 ")), Some(9.5));
        assert_eq!(parse_numeric_or_missing(&Cell::from_text("abc")), None);
        assert_eq!(parse_numeric_or_missing(&Cell::from_text("")), None);
        assert_eq!(parse_numeric_or_missing(&Cell::from_text("nan")), None);
        assert_eq!(parse_numeric_or_missing(&Cell::Number(f64::INFINITY)), None);
        assert_eq!(parse_numeric_or_missing(&Cell::Missing), None);
    }

    #[test]
    fn test_push_row_normalizes_width() {
        let mut table = LabTable::new(vec!["a".into(), "b".into()]);
        table.push_row(vec![Cell::Number(1.0)]);
        table.push_row(vec![Cell::Number(1.0), Cell::Number(2.0), Cell::Number(3.0)]);
        assert_eq!(table.rows()[0], vec![Cell::Number(1.0), Cell::Missing]);
        assert_eq!(table.rows()[1].len(), 2);
    }

    #[test]
    fn test_cell_text_form() {
        assert_eq!(Cell::Number(1.0).as_text().as_deref(), Some("1"));
        assert_eq!(Cell::Number(1.5).as_text().as_deref(), Some("1.5"));
        assert_eq!(Cell::from_text(" M ").as_text().as_deref(), Some("M"));
        assert_eq!(Cell::Missing.as_text(), None);
    }

    #[test]
    fn test_from_records_uses_canonical_headers() {
        let record = CbcRecord {
            id: Some("S-1".into()),
            hgb: Some(12.0),
            ..Default::default()
        };
        let table = LabTable::from_records(&[record]);
        assert_eq!(table.len(), 1);
        let hgb = table.headers().iter().position(|h| h == "HGB").expect("HGB header");
        assert_eq!(table.rows()[0][hgb], Cell::Number(12.0));
        let id = table.headers().iter().position(|h| h == "ID").expect("ID header");
        assert_eq!(table.rows()[0][id], Cell::Text("S-1".into()));
    }
}

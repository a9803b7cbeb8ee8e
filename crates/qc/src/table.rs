//! In-memory tabular input: a header row plus rows of loosely-typed cells.
//!
//! Cells stay as text until a consumer asks for a number, so identifiers like
//! `"005"` survive untouched while offsets and measures are parsed on demand.

use std::io::Read;

use serde::Serialize;

use crate::error::QcError;

/// Tokens treated as a missing value in numeric columns (case-insensitive).
const MISSING_TOKENS: &[&str] = &["na", "n/a", "nan", "null", "none"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the cell.
    ///
    /// `Ok(None)` for blanks, missing-value tokens and NaN. `Err` carries the
    /// offending text when the cell holds something that is not a number.
    pub fn to_number(&self) -> Result<Option<f64>, &str> {
        match self {
            Self::Null => Ok(None),
            Self::Number(n) if n.is_nan() => Ok(None),
            Self::Number(n) => Ok(Some(*n)),
            Self::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() || is_missing_token(trimmed) {
                    return Ok(None);
                }
                match trimmed.parse::<f64>() {
                    Ok(n) if n.is_nan() => Ok(None),
                    Ok(n) => Ok(Some(n)),
                    Err(_) => Err(s.as_str()),
                }
            }
        }
    }

    /// String form used for matching keys: trimmed text, `5` rather than `5.0`.
    pub fn key_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.trim().to_string(),
        }
    }

    /// Field as written back out to CSV. Missing values become empty fields.
    pub fn to_field(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Number(n) if n.is_nan() => String::new(),
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Number(n) => n.is_nan(),
            Self::Text(s) => s.trim().is_empty(),
        }
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

fn is_missing_token(s: &str) -> bool {
    MISSING_TOKENS.iter().any(|t| s.eq_ignore_ascii_case(t))
}

/// A parsed table. Every row has exactly `headers.len()` cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self, QcError> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != headers.len() {
                return Err(QcError::RaggedRow {
                    row: i,
                    expected: headers.len(),
                    found: row.len(),
                });
            }
        }
        Ok(Self { headers, rows })
    }

    /// Parse a header-row CSV. Blank fields become `Cell::Null`, everything
    /// else is kept as text.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, QcError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let row = record
                .iter()
                .map(|v| {
                    if v.trim().is_empty() {
                        Cell::Null
                    } else {
                        Cell::Text(v.to_string())
                    }
                })
                .collect();
            rows.push(row);
        }

        Self::new(headers, rows)
    }

    pub fn from_csv_str(data: &str) -> Result<Self, QcError> {
        Self::from_csv_reader(data.as_bytes())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_number_variants() {
        assert_eq!(Cell::text("1.25").to_number(), Ok(Some(1.25)));
        assert_eq!(Cell::text("  -3 ").to_number(), Ok(Some(-3.0)));
        assert_eq!(Cell::Number(7.0).to_number(), Ok(Some(7.0)));
        assert_eq!(Cell::Null.to_number(), Ok(None));
        assert_eq!(Cell::Number(f64::NAN).to_number(), Ok(None));
        assert_eq!(Cell::text("").to_number(), Ok(None));
        assert_eq!(Cell::text("NA").to_number(), Ok(None));
        assert_eq!(Cell::text("nan").to_number(), Ok(None));
        assert_eq!(Cell::text("N/A").to_number(), Ok(None));
        assert_eq!(Cell::text("abc").to_number(), Err("abc"));
    }

    #[test]
    fn key_string_drops_trailing_zero() {
        assert_eq!(Cell::Number(5.0).key_string(), "5");
        assert_eq!(Cell::text(" IH0035 ").key_string(), "IH0035");
        assert_eq!(Cell::text("005").key_string(), "005");
        assert_eq!(Cell::Null.key_string(), "");
    }

    #[test]
    fn csv_blank_becomes_null() {
        let t = Table::from_csv_str("route_id,county,IRI\nIH0035,Travis,\nIH0035,Hays,88\n").unwrap();
        assert_eq!(t.headers(), &["route_id", "county", "IRI"]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.rows()[0][2], Cell::Null);
        assert_eq!(t.rows()[1][2], Cell::text("88"));
        assert_eq!(t.column_index("county"), Some(1));
        assert_eq!(t.column_index("missing"), None);
    }

    #[test]
    fn csv_ragged_row_rejected() {
        let err = Table::from_csv_str("a,b\n1,2\n3\n").unwrap_err();
        assert!(matches!(err, QcError::Csv(_)));
    }

    #[test]
    fn new_rejects_ragged_rows() {
        let err = Table::new(
            vec!["a".into(), "b".into()],
            vec![vec![Cell::Null, Cell::Null], vec![Cell::Null]],
        )
        .unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }
}

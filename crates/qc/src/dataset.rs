//! Turning a raw `Table` into keyed `SegmentRecord`s, and deriving the
//! suffix labels for each side.

use std::collections::BTreeSet;

use crate::config::{ColumnMapping, ComparisonMode};
use crate::error::QcError;
use crate::model::{Dataset, SegmentRecord, Side, SideLabels};
use crate::table::{Cell, Table};

impl Dataset {
    /// Resolve the key columns and extract one record per row.
    ///
    /// Blank or NaN offsets become `None` and never match. Non-numeric text
    /// in an offset column fails the whole call.
    pub fn from_table(side: Side, table: &Table, columns: &ColumnMapping) -> Result<Self, QcError> {
        let idx = |name: &str| -> Result<usize, QcError> {
            table.column_index(name).ok_or_else(|| QcError::MissingKeyColumn {
                side: side.as_str().into(),
                column: name.into(),
            })
        };

        let route_idx = idx(&columns.route_id)?;
        let county_idx = idx(&columns.county)?;
        let begin_idx = idx(&columns.begin_offset)?;
        let end_idx = idx(&columns.end_offset)?;

        let mut records = Vec::with_capacity(table.len());
        for (row_index, row) in table.rows().iter().enumerate() {
            let begin_offset = parse_offset(side, row_index, &columns.begin_offset, &row[begin_idx])?;
            let end_offset = parse_offset(side, row_index, &columns.end_offset, &row[end_idx])?;

            records.push(SegmentRecord {
                row_index,
                route_id: row[route_idx].key_string(),
                county: row[county_idx].key_string(),
                begin_offset,
                end_offset,
                fields: row.clone(),
            });
        }

        log::debug!("{} table: {} record(s) extracted", side.as_str(), records.len());

        Ok(Self {
            side,
            headers: table.headers().to_vec(),
            records,
        })
    }
}

fn parse_offset(side: Side, row: usize, column: &str, cell: &Cell) -> Result<Option<f64>, QcError> {
    cell.to_number().map_err(|value| QcError::InvalidNumber {
        side: side.as_str().into(),
        row,
        column: column.into(),
        value: value.into(),
    })
}

/// Suffix labels for a comparison.
///
/// Audit comparisons are always `Pathway` / `Audit`. Year-over-year
/// comparisons use the fiscal year found in each table, which must be a
/// single value per table and differ between the two.
pub fn resolve_labels(
    mode: ComparisonMode,
    left: &Table,
    right: &Table,
    columns: &ColumnMapping,
) -> Result<SideLabels, QcError> {
    match mode {
        ComparisonMode::Audit => Ok(SideLabels::audit()),
        ComparisonMode::YearOverYear => {
            let left_label = fiscal_year(Side::Left, left, &columns.fiscal_year)?;
            let right_label = fiscal_year(Side::Right, right, &columns.fiscal_year)?;
            if left_label == right_label {
                return Err(QcError::SideLabelConflict(left_label));
            }
            Ok(SideLabels { left: left_label, right: right_label })
        }
    }
}

fn fiscal_year(side: Side, table: &Table, column: &str) -> Result<String, QcError> {
    let idx = table.column_index(column).ok_or_else(|| QcError::MissingColumn {
        side: side.as_str().into(),
        column: column.into(),
    })?;

    let values: BTreeSet<String> = table
        .rows()
        .iter()
        .filter(|row| !row[idx].is_null())
        .map(|row| row[idx].key_string())
        .collect();

    if values.len() != 1 {
        return Err(QcError::MixedFiscalYears {
            side: side.as_str().into(),
            values: values.into_iter().collect(),
        });
    }

    Ok(values.into_iter().next().unwrap_or_default())
}

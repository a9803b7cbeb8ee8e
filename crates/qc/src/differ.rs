use std::collections::BTreeSet;

use crate::config::{MeasureKind, MeasureSpec};
use crate::error::QcError;
use crate::model::{DeviationRow, DeviationTable, MatchOutput, SegmentRecord, Side};

/// Compute `diff_<m> = m_left - m_right` for every raw measure of every pair.
///
/// Utility/index measures are skipped and listed in `DeviationTable::skipped`.
/// A missing value on either side yields NaN for that cell; it is not an error.
/// Non-numeric text in a measure column is.
pub fn compute_deviations(
    matched: &MatchOutput,
    measures: &[MeasureSpec],
) -> Result<DeviationTable, QcError> {
    let mut seen = BTreeSet::new();
    for m in measures {
        if !seen.insert(m.name.as_str()) {
            return Err(QcError::ConfigValidation(format!(
                "measure '{}' is listed twice",
                m.name
            )));
        }
    }

    let (raw, skipped): (Vec<&MeasureSpec>, Vec<&MeasureSpec>) =
        measures.iter().partition(|m| m.kind == MeasureKind::Raw);

    // (name, left column index, right column index)
    let mut columns = Vec::with_capacity(raw.len());
    for m in &raw {
        let left_idx = measure_column(matched, Side::Left, &m.name)?;
        let right_idx = measure_column(matched, Side::Right, &m.name)?;
        columns.push((m.name.as_str(), left_idx, right_idx));
    }

    let mut rows = Vec::with_capacity(matched.pairs.len());
    for pair in &matched.pairs {
        let mut diffs = Vec::with_capacity(columns.len());
        for &(name, left_idx, right_idx) in &columns {
            let l = measure_value(&pair.left, Side::Left, name, left_idx)?;
            let r = measure_value(&pair.right, Side::Right, name, right_idx)?;
            diffs.push(match (l, r) {
                (Some(l), Some(r)) => l - r,
                _ => f64::NAN,
            });
        }
        rows.push(DeviationRow {
            pair: pair.clone(),
            diffs,
        });
    }

    if !skipped.is_empty() {
        log::debug!(
            "not differencing utility/index measure(s): {}",
            skipped.iter().map(|m| m.name.as_str()).collect::<Vec<_>>().join(", ")
        );
    }

    Ok(DeviationTable {
        labels: matched.labels.clone(),
        left_headers: matched.left_headers.clone(),
        right_headers: matched.right_headers.clone(),
        measures: raw.iter().map(|m| m.name.clone()).collect(),
        skipped: skipped.iter().map(|m| m.name.clone()).collect(),
        rows,
    })
}

fn measure_column(matched: &MatchOutput, side: Side, name: &str) -> Result<usize, QcError> {
    matched
        .headers(side)
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| QcError::MissingColumn {
            side: side.as_str().into(),
            column: name.into(),
        })
}

fn measure_value(
    rec: &SegmentRecord,
    side: Side,
    name: &str,
    idx: usize,
) -> Result<Option<f64>, QcError> {
    match rec.fields.get(idx) {
        Some(cell) => cell.to_number().map_err(|value| QcError::InvalidNumber {
            side: side.as_str().into(),
            row: rec.row_index,
            column: name.into(),
            value: value.into(),
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchPolicy;
    use crate::model::{MatchDiagnostics, MatchedPair, SideLabels};
    use crate::table::Cell;

    fn rec(row: usize, iri: Cell, util: Cell) -> SegmentRecord {
        SegmentRecord {
            row_index: row,
            route_id: "5".into(),
            county: "Travis".into(),
            begin_offset: Some(0.0),
            end_offset: Some(1.0),
            fields: vec![Cell::text("5"), iri, util],
        }
    }

    fn output(pairs: Vec<(SegmentRecord, SegmentRecord)>) -> MatchOutput {
        let headers: Vec<String> = vec!["route_id".into(), "IRI".into(), "RIDE_UTIL".into()];
        MatchOutput {
            labels: SideLabels::audit(),
            policy: MatchPolicy::AllCandidates,
            left_headers: headers.clone(),
            right_headers: headers,
            pairs: pairs
                .into_iter()
                .map(|(left, right)| MatchedPair {
                    left,
                    right,
                    begin_delta: 0.0,
                    end_delta: 0.0,
                })
                .collect(),
            diagnostics: MatchDiagnostics::default(),
        }
    }

    fn measures() -> Vec<MeasureSpec> {
        vec![MeasureSpec::raw("IRI"), MeasureSpec::utility("RIDE_UTIL")]
    }

    #[test]
    fn signed_difference_left_minus_right() {
        let out = output(vec![(
            rec(0, Cell::text("100"), Cell::text("80")),
            rec(0, Cell::text("130"), Cell::text("70")),
        )]);
        let table = compute_deviations(&out, &measures()).unwrap();
        assert_eq!(table.measures, vec!["IRI"]);
        assert_eq!(table.skipped, vec!["RIDE_UTIL"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].diffs, vec![-30.0]);
    }

    #[test]
    fn missing_side_propagates_nan() {
        let out = output(vec![
            (rec(0, Cell::Null, Cell::Null), rec(0, Cell::text("130"), Cell::Null)),
            (rec(1, Cell::text("90"), Cell::Null), rec(1, Cell::text("NA"), Cell::Null)),
            (rec(2, Cell::text("90"), Cell::Null), rec(2, Cell::text("85.5"), Cell::Null)),
        ]);
        let table = compute_deviations(&out, &measures()).unwrap();
        assert_eq!(table.rows.len(), 3);
        assert!(table.rows[0].diffs[0].is_nan());
        assert!(table.rows[1].diffs[0].is_nan());
        assert_eq!(table.rows[2].diffs[0], 4.5);
    }

    #[test]
    fn missing_measure_column_fails() {
        let out = output(vec![]);
        let err = compute_deviations(&out, &[MeasureSpec::raw("RUT")]).unwrap_err();
        match err {
            QcError::MissingColumn { side, column } => {
                assert_eq!(side, "left");
                assert_eq!(column, "RUT");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn utility_column_need_not_exist() {
        let out = output(vec![]);
        let table = compute_deviations(
            &out,
            &[MeasureSpec::raw("IRI"), MeasureSpec::utility("CONDITION_SCORE")],
        )
        .unwrap();
        assert_eq!(table.skipped, vec!["CONDITION_SCORE"]);
    }

    #[test]
    fn non_numeric_measure_fails() {
        let out = output(vec![(
            rec(3, Cell::text("smooth"), Cell::Null),
            rec(0, Cell::text("130"), Cell::Null),
        )]);
        let err = compute_deviations(&out, &measures()).unwrap_err();
        assert!(matches!(err, QcError::InvalidNumber { row: 3, .. }));
    }

    #[test]
    fn duplicate_measure_rejected() {
        let out = output(vec![]);
        let err =
            compute_deviations(&out, &[MeasureSpec::raw("IRI"), MeasureSpec::raw("IRI")]).unwrap_err();
        assert!(matches!(err, QcError::ConfigValidation(_)));
    }

    #[test]
    fn input_pairs_untouched() {
        let out = output(vec![(
            rec(0, Cell::text("100"), Cell::Null),
            rec(0, Cell::text("130"), Cell::Null),
        )]);
        let before = out.pairs.clone();
        let table = compute_deviations(&out, &measures()).unwrap();
        assert_eq!(out.pairs, before);
        assert_eq!(table.rows[0].pair, before[0]);
    }
}

use std::collections::BTreeMap;

use crate::error::QcError;
use crate::model::{DeviationTable, GroupCount, MatchDiagnostics, OutlierReport, QcSummary, Side};

/// Compute summary statistics for a finished run.
pub fn compute_summary(
    diagnostics: &MatchDiagnostics,
    table: &DeviationTable,
    report: &OutlierReport,
) -> QcSummary {
    let mut by_measure: BTreeMap<&str, usize> = BTreeMap::new();
    for flag in &report.flagged {
        for m in &flag.measures {
            *by_measure.entry(m.as_str()).or_insert(0) += 1;
        }
    }

    // Keep selection order; measures that never fired report 0.
    let flagged_by_measure = report
        .applied
        .iter()
        .map(|a| {
            let count = by_measure.get(a.measure.as_str()).copied().unwrap_or(0);
            (a.measure.clone(), count)
        })
        .collect();

    QcSummary {
        pairs: table.len(),
        flagged: report.flagged.len(),
        flagged_by_measure,
        excluded_measures: report.excluded.len(),
        ambiguous_left: diagnostics.ambiguous_left,
    }
}

/// Row and flag counts per distinct value of a carried column on one side
/// (county, lane, direction, ...). Sorted by value.
pub fn group_counts(
    table: &DeviationTable,
    report: &OutlierReport,
    column: &str,
    side: Side,
) -> Result<Vec<GroupCount>, QcError> {
    let idx = table
        .headers(side)
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| QcError::MissingColumn {
            side: side.as_str().into(),
            column: column.into(),
        })?;

    let mut counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for (i, row) in table.rows.iter().enumerate() {
        let value = row
            .pair
            .record(side)
            .fields
            .get(idx)
            .map(|c| c.key_string())
            .unwrap_or_default();
        let entry = counts.entry(value).or_insert((0, 0));
        entry.0 += 1;
        if report.is_flagged(i) {
            entry.1 += 1;
        }
    }

    Ok(counts
        .into_iter()
        .map(|(value, (rows, flagged))| GroupCount { value, rows, flagged })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComparisonMode;
    use crate::model::{
        AppliedThreshold, DegenerateReason, DeviationRow, ExcludedMeasure, FlaggedRow, Interval,
        MatchedPair, SegmentRecord, SideLabels,
    };
    use crate::table::Cell;

    fn row(county: &str, lane: &str) -> DeviationRow {
        let rec = SegmentRecord {
            row_index: 0,
            route_id: "IH0035".into(),
            county: county.into(),
            begin_offset: Some(0.0),
            end_offset: Some(0.5),
            fields: vec![Cell::text(county), Cell::text(lane)],
        };
        DeviationRow {
            pair: MatchedPair { left: rec.clone(), right: rec, begin_delta: 0.0, end_delta: 0.0 },
            diffs: vec![0.0, 0.0],
        }
    }

    fn fixture() -> (DeviationTable, OutlierReport) {
        let headers = vec!["county".to_string(), "lane".to_string()];
        let table = DeviationTable {
            labels: SideLabels::audit(),
            left_headers: headers.clone(),
            right_headers: headers,
            measures: vec!["IRI".into(), "RUT".into()],
            skipped: vec![],
            rows: vec![
                row("Travis", "K1"),
                row("Hays", "K1"),
                row("Travis", "R1"),
                row("Travis", "K1"),
            ],
        };
        let report = OutlierReport {
            mode: ComparisonMode::Audit,
            selection: vec!["IRI".into(), "RUT".into(), "CRACKS".into()],
            applied: vec![
                AppliedThreshold {
                    measure: "IRI".into(),
                    interval: Interval::new(0.0, 10.0),
                    overridden: false,
                },
                AppliedThreshold {
                    measure: "RUT".into(),
                    interval: Interval::new(0.0, 0.2),
                    overridden: true,
                },
            ],
            excluded: vec![ExcludedMeasure {
                measure: "CRACKS".into(),
                reason: DegenerateReason::ZeroWidth,
            }],
            flagged: vec![
                FlaggedRow { row: 0, measures: vec!["IRI".into()] },
                FlaggedRow { row: 2, measures: vec!["IRI".into()] },
            ],
        };
        (table, report)
    }

    #[test]
    fn summary_counts() {
        let (table, report) = fixture();
        let diag = MatchDiagnostics { ambiguous_left: 3, ..Default::default() };
        let summary = compute_summary(&diag, &table, &report);
        assert_eq!(summary.pairs, 4);
        assert_eq!(summary.flagged, 2);
        assert_eq!(
            summary.flagged_by_measure,
            vec![("IRI".to_string(), 2), ("RUT".to_string(), 0)]
        );
        assert_eq!(summary.excluded_measures, 1);
        assert_eq!(summary.ambiguous_left, 3);
    }

    #[test]
    fn counts_by_county() {
        let (table, report) = fixture();
        let groups = group_counts(&table, &report, "county", Side::Left).unwrap();
        assert_eq!(
            groups,
            vec![
                GroupCount { value: "Hays".into(), rows: 1, flagged: 0 },
                GroupCount { value: "Travis".into(), rows: 3, flagged: 2 },
            ]
        );
    }

    #[test]
    fn counts_by_lane_on_right() {
        let (table, report) = fixture();
        let groups = group_counts(&table, &report, "lane", Side::Right).unwrap();
        assert_eq!(groups[0], GroupCount { value: "K1".into(), rows: 3, flagged: 1 });
        assert_eq!(groups[1], GroupCount { value: "R1".into(), rows: 1, flagged: 1 });
    }

    #[test]
    fn unknown_column() {
        let (table, report) = fixture();
        let err = group_counts(&table, &report, "direction", Side::Left).unwrap_err();
        assert!(matches!(err, QcError::MissingColumn { .. }));
    }
}

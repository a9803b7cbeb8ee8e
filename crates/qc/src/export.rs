//! Flat CSV artifact: both sides' source fields side by side, one
//! `diff_<measure>` column per differenced measure, then the outlier flag.

use std::io::Write;

use crate::config::ExportScope;
use crate::error::QcError;
use crate::model::{DeviationRow, DeviationTable, OutlierReport, Side};

const SIDES: [Side; 2] = [Side::Left, Side::Right];

/// Name of the derived length column for one side. Falls back to
/// `segment_length_derived` (then `_2`, `_3`, ...) when the source table
/// already carries a column by that name.
fn length_column(source: &[String]) -> String {
    let taken = |name: &str| source.iter().any(|h| h == name);
    if !taken("segment_length") {
        return "segment_length".into();
    }
    let mut name = "segment_length_derived".to_string();
    let mut n = 2;
    while taken(&name) {
        name = format!("segment_length_derived_{n}");
        n += 1;
    }
    name
}

pub fn header_row(table: &DeviationTable) -> Vec<String> {
    let mut header = Vec::new();
    for side in SIDES {
        let source = table.headers(side);
        for col in source {
            header.push(table.labels.suffixed(side, col));
        }
        header.push(table.labels.suffixed(side, &length_column(source)));
    }
    for m in &table.measures {
        header.push(format!("diff_{m}"));
    }
    header.push("outlier".into());
    header.push("outlier_measures".into());
    header
}

fn number_field(v: Option<f64>) -> String {
    match v {
        Some(n) if !n.is_nan() => n.to_string(),
        _ => String::new(),
    }
}

fn record(row: &DeviationRow, width: usize, flagged: Option<&[String]>) -> Vec<String> {
    let mut out = Vec::with_capacity(width);
    for side in SIDES {
        out.extend(row.pair.record(side).fields.iter().map(|c| c.to_field()));
        out.push(number_field(row.pair.segment_length(side)));
    }
    out.extend(row.diffs.iter().map(|d| number_field(Some(*d))));
    out.push(flagged.is_some().to_string());
    out.push(flagged.map(|m| m.join(";")).unwrap_or_default());
    out
}

/// Write the deviation table as CSV. The header is always written, even when
/// no row qualifies. Returns the number of data rows written.
pub fn write_csv<W: Write>(
    writer: W,
    table: &DeviationTable,
    report: &OutlierReport,
    scope: ExportScope,
) -> Result<usize, QcError> {
    let mut csv_writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);

    let header = header_row(table);
    csv_writer.write_record(&header)?;

    let mut written = 0;
    for (i, row) in table.rows.iter().enumerate() {
        let flagged = report.flag_for(i).map(|f| f.measures.as_slice());
        if scope == ExportScope::FlaggedOnly && flagged.is_none() {
            continue;
        }
        csv_writer.write_record(record(row, header.len(), flagged))?;
        written += 1;
    }

    csv_writer.flush()?;
    log::debug!("wrote {written} CSV row(s) ({scope:?})");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComparisonMode;
    use crate::model::{FlaggedRow, MatchedPair, SegmentRecord, SideLabels};
    use crate::table::Cell;

    fn rec(iri: &str) -> SegmentRecord {
        SegmentRecord {
            row_index: 0,
            route_id: "IH0035".into(),
            county: "Travis".into(),
            begin_offset: Some(1.0),
            end_offset: Some(1.5),
            fields: vec![Cell::text("IH0035"), Cell::text(iri)],
        }
    }

    fn fixture() -> (DeviationTable, OutlierReport) {
        let headers = vec!["route_id".to_string(), "IRI".to_string()];
        let row = |l: &str, r: &str, d: f64| DeviationRow {
            pair: MatchedPair { left: rec(l), right: rec(r), begin_delta: 0.0, end_delta: 0.0 },
            diffs: vec![d],
        };
        let table = DeviationTable {
            labels: SideLabels { left: "2023".into(), right: "2024".into() },
            left_headers: headers.clone(),
            right_headers: headers,
            measures: vec!["IRI".into()],
            skipped: vec![],
            rows: vec![row("100", "130", -30.0), row("90", "", f64::NAN)],
        };
        let report = OutlierReport {
            mode: ComparisonMode::YearOverYear,
            selection: vec!["IRI".into()],
            applied: vec![],
            excluded: vec![],
            flagged: vec![FlaggedRow { row: 0, measures: vec!["IRI".into()] }],
        };
        (table, report)
    }

    fn render(scope: ExportScope) -> (usize, String) {
        let (table, report) = fixture();
        let mut buf = Vec::new();
        let n = write_csv(&mut buf, &table, &report, scope).unwrap();
        (n, String::from_utf8(buf).unwrap())
    }

    #[test]
    fn header_uses_side_labels() {
        let (table, _) = fixture();
        assert_eq!(
            header_row(&table),
            vec![
                "route_id_2023",
                "IRI_2023",
                "segment_length_2023",
                "route_id_2024",
                "IRI_2024",
                "segment_length_2024",
                "diff_IRI",
                "outlier",
                "outlier_measures",
            ]
        );
    }

    #[test]
    fn derived_length_never_collides_with_source_column() {
        let (mut table, _) = fixture();
        table.left_headers = vec!["segment_length".into(), "IRI".into()];
        table.right_headers =
            vec!["segment_length".into(), "segment_length_derived".into()];
        let header = header_row(&table);
        assert_eq!(
            header[..6],
            [
                "segment_length_2023",
                "IRI_2023",
                "segment_length_derived_2023",
                "segment_length_2024",
                "segment_length_derived_2024",
                "segment_length_derived_2_2024",
            ]
        );
        let mut unique = header.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), header.len());
    }

    #[test]
    fn all_rows() {
        let (n, out) = render(ExportScope::All);
        assert_eq!(n, 2);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "IH0035,100,0.5,IH0035,130,0.5,-30,true,IRI");
        // NaN diff and blank measure render empty
        assert_eq!(lines[2], "IH0035,90,0.5,IH0035,,0.5,,false,");
    }

    #[test]
    fn flagged_only() {
        let (n, out) = render(ExportScope::FlaggedOnly);
        assert_eq!(n, 1);
        assert_eq!(out.lines().count(), 2);
        assert!(out.lines().nth(1).unwrap().ends_with(",true,IRI"));
    }

    #[test]
    fn header_written_without_rows() {
        let (mut table, report) = fixture();
        table.rows.clear();
        let mut buf = Vec::new();
        let n = write_csv(&mut buf, &table, &report, ExportScope::All).unwrap();
        assert_eq!(n, 0);
        let out = String::from_utf8(buf).unwrap();
        assert_eq!(out.lines().count(), 1);
        assert!(out.starts_with("route_id_2023,"));
    }

    #[test]
    fn writes_to_file() {
        let (table, report) = fixture();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qc.csv");
        let file = std::fs::File::create(&path).unwrap();
        write_csv(file, &table, &report, ExportScope::All).unwrap();
        let reread = crate::table::Table::from_csv_reader(std::fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(reread.len(), 2);
        assert_eq!(reread.column_index("diff_IRI"), Some(6));
    }
}

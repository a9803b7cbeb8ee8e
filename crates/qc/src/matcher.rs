use std::collections::{BTreeMap, BTreeSet};

use crate::config::{MatchConfig, MatchPolicy, OFFSET_EPSILON};
use crate::model::{Dataset, MatchDiagnostics, MatchOutcome, MatchOutput, MatchedPair, SegmentRecord, SideLabels};

/// Join key: exact (route_id, county). Records with either part blank never join.
type SegmentKey<'a> = (&'a str, &'a str);

/// Match left segments to right segments.
///
/// 1. Drop left records whose county never appears on the right.
/// 2. Join on exact (route_id, county); one-to-many.
/// 3. Keep candidates with |Δbegin| < tolerance and |Δend| < tolerance.
///
/// With `MatchPolicy::AllCandidates` every surviving candidate becomes its own
/// pair, so the output can hold more rows than the left input. Pairs come out
/// in left input order, then right input order.
pub fn match_segments(
    left: &Dataset,
    right: &Dataset,
    labels: SideLabels,
    config: &MatchConfig,
) -> MatchOutcome {
    let right_counties: BTreeSet<&str> = right
        .records
        .iter()
        .filter(|r| !r.county.is_empty())
        .map(|r| r.county.as_str())
        .collect();

    let mut right_index: BTreeMap<SegmentKey<'_>, Vec<&SegmentRecord>> = BTreeMap::new();
    for rec in &right.records {
        if let Some(key) = join_key(rec) {
            right_index.entry(key).or_default().push(rec);
        }
    }

    let mut diag = MatchDiagnostics {
        left_records: left.records.len(),
        right_records: right.records.len(),
        ..MatchDiagnostics::default()
    };
    let mut pairs = Vec::new();

    for left_rec in &left.records {
        if !right_counties.contains(left_rec.county.as_str()) {
            diag.county_filtered += 1;
            diag.unmatched_left += 1;
            continue;
        }

        let candidates = join_key(left_rec)
            .and_then(|key| right_index.get(&key))
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        diag.candidate_pairs += candidates.len();

        let surviving: Vec<(&SegmentRecord, f64, f64)> = candidates
            .iter()
            .filter_map(|right_rec| {
                offset_deltas(left_rec, right_rec, config.tolerance)
                    .map(|(db, de)| (*right_rec, db, de))
            })
            .collect();
        diag.rejected_by_tolerance += candidates.len() - surviving.len();

        match surviving.len() {
            0 => {
                diag.unmatched_left += 1;
                continue;
            }
            1 => {}
            n => {
                diag.ambiguous_left += 1;
                log::debug!(
                    "left row {} ({} / {}): {n} candidates within tolerance",
                    left_rec.row_index,
                    left_rec.route_id,
                    left_rec.county
                );
            }
        }
        diag.max_candidates = diag.max_candidates.max(surviving.len());

        match config.policy {
            MatchPolicy::AllCandidates => {
                for (right_rec, begin_delta, end_delta) in surviving {
                    pairs.push(make_pair(left_rec, right_rec, begin_delta, end_delta));
                }
            }
            MatchPolicy::ClosestOnly => {
                diag.dropped_by_policy += surviving.len() - 1;
                let closest = surviving.into_iter().min_by(|a, b| {
                    let da = a.1.abs() + a.2.abs();
                    let db = b.1.abs() + b.2.abs();
                    da.total_cmp(&db)
                        .then_with(|| a.0.row_index.cmp(&b.0.row_index))
                });
                if let Some((right_rec, begin_delta, end_delta)) = closest {
                    pairs.push(make_pair(left_rec, right_rec, begin_delta, end_delta));
                }
            }
        }
    }

    diag.pairs = pairs.len();

    if diag.ambiguous_left > 0 {
        log::warn!(
            "{} left record(s) matched more than one right record (max {} candidates)",
            diag.ambiguous_left,
            diag.max_candidates
        );
    }
    log::info!(
        "matched {} pair(s): {} left / {} right records, {} candidate(s), {} rejected by tolerance",
        diag.pairs,
        diag.left_records,
        diag.right_records,
        diag.candidate_pairs,
        diag.rejected_by_tolerance
    );

    if pairs.is_empty() {
        return MatchOutcome::Empty { labels, diagnostics: diag };
    }

    MatchOutcome::Matched(MatchOutput {
        labels,
        policy: config.policy,
        left_headers: left.headers.clone(),
        right_headers: right.headers.clone(),
        pairs,
        diagnostics: diag,
    })
}

fn join_key(rec: &SegmentRecord) -> Option<SegmentKey<'_>> {
    if rec.route_id.is_empty() || rec.county.is_empty() {
        return None;
    }
    Some((rec.route_id.as_str(), rec.county.as_str()))
}

/// Signed (left - right) begin/end deltas when both fall strictly inside the
/// tolerance, less `OFFSET_EPSILON` of rounding slack. Missing offsets never
/// match.
fn offset_deltas(left: &SegmentRecord, right: &SegmentRecord, tolerance: f64) -> Option<(f64, f64)> {
    let begin_delta = left.begin_offset? - right.begin_offset?;
    let end_delta = left.end_offset? - right.end_offset?;
    let limit = tolerance - OFFSET_EPSILON;
    if begin_delta.abs() < limit && end_delta.abs() < limit {
        Some((begin_delta, end_delta))
    } else {
        None
    }
}

fn make_pair(left: &SegmentRecord, right: &SegmentRecord, begin_delta: f64, end_delta: f64) -> MatchedPair {
    MatchedPair {
        left: left.clone(),
        right: right.clone(),
        begin_delta,
        end_delta,
    }
}

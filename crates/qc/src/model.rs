use serde::{Deserialize, Serialize};

use crate::config::{ComparisonMode, MatchPolicy, ThresholdMethod};
use crate::table::Cell;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One survey row, keyed for matching. `fields` is the full source row in
/// header order and is carried through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRecord {
    pub row_index: usize,
    pub route_id: String,
    pub county: String,
    pub begin_offset: Option<f64>,
    pub end_offset: Option<f64>,
    pub fields: Vec<Cell>,
}

impl SegmentRecord {
    pub fn segment_length(&self) -> Option<f64> {
        match (self.begin_offset, self.end_offset) {
            (Some(b), Some(e)) => Some(e - b),
            _ => None,
        }
    }
}

/// A side's records plus the header row their `fields` follow.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub side: Side,
    pub headers: Vec<String>,
    pub records: Vec<SegmentRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

/// Suffix labels that disambiguate the two sides in merged output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SideLabels {
    pub left: String,
    pub right: String,
}

impl SideLabels {
    pub fn audit() -> Self {
        Self { left: "Pathway".into(), right: "Audit".into() }
    }

    pub fn label(&self, side: Side) -> &str {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// `IRI` + `Pathway` -> `IRI_Pathway`.
    pub fn suffixed(&self, side: Side, column: &str) -> String {
        format!("{column}_{}", self.label(side))
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Two records judged to be the same physical segment. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedPair {
    pub left: SegmentRecord,
    pub right: SegmentRecord,
    pub begin_delta: f64,
    pub end_delta: f64,
}

impl MatchedPair {
    pub fn segment_length(&self, side: Side) -> Option<f64> {
        match side {
            Side::Left => self.left.segment_length(),
            Side::Right => self.right.segment_length(),
        }
    }

    pub fn record(&self, side: Side) -> &SegmentRecord {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchDiagnostics {
    pub left_records: usize,
    pub right_records: usize,
    /// Left records whose county never appears on the right.
    pub county_filtered: usize,
    /// Pairs produced by the (route_id, county) join, before tolerance.
    pub candidate_pairs: usize,
    pub rejected_by_tolerance: usize,
    /// Left records with no candidate left after tolerance filtering.
    pub unmatched_left: usize,
    /// Left records with more than one candidate left after tolerance filtering.
    pub ambiguous_left: usize,
    pub max_candidates: usize,
    /// Candidates discarded by `MatchPolicy::ClosestOnly`.
    pub dropped_by_policy: usize,
    pub pairs: usize,
}

#[derive(Debug, Clone)]
pub struct MatchOutput {
    pub labels: SideLabels,
    pub policy: MatchPolicy,
    pub left_headers: Vec<String>,
    pub right_headers: Vec<String>,
    pub pairs: Vec<MatchedPair>,
    pub diagnostics: MatchDiagnostics,
}

impl MatchOutput {
    pub fn headers(&self, side: Side) -> &[String] {
        match side {
            Side::Left => &self.left_headers,
            Side::Right => &self.right_headers,
        }
    }
}

/// Result of a matching pass. `Empty` is a real state, distinct from a pass
/// that has not run, so downstream stages can short-circuit on it.
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Matched(MatchOutput),
    Empty { labels: SideLabels, diagnostics: MatchDiagnostics },
}

impl MatchOutcome {
    pub fn diagnostics(&self) -> &MatchDiagnostics {
        match self {
            Self::Matched(out) => &out.diagnostics,
            Self::Empty { diagnostics, .. } => diagnostics,
        }
    }

    pub fn matched(&self) -> Option<&MatchOutput> {
        match self {
            Self::Matched(out) => Some(out),
            Self::Empty { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Deviations
// ---------------------------------------------------------------------------

/// A matched pair plus one signed difference per differenced measure
/// (parallel to `DeviationTable::measures`). NaN where either side is missing.
#[derive(Debug, Clone)]
pub struct DeviationRow {
    pub pair: MatchedPair,
    pub diffs: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct DeviationTable {
    pub labels: SideLabels,
    pub left_headers: Vec<String>,
    pub right_headers: Vec<String>,
    /// Differenced measures, in configured order.
    pub measures: Vec<String>,
    /// Utility/index measures carried but not differenced.
    pub skipped: Vec<String>,
    pub rows: Vec<DeviationRow>,
}

impl DeviationTable {
    pub fn measure_index(&self, measure: &str) -> Option<usize> {
        self.measures.iter().position(|m| m == measure)
    }

    /// All values of `diff_<measure>`, NaN included.
    pub fn diff_column(&self, idx: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows.iter().map(move |r| r.diffs[idx])
    }

    pub fn headers(&self, side: Side) -> &[String] {
        match side {
            Side::Left => &self.left_headers,
            Side::Right => &self.right_headers,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Closed threshold interval. In audit mode `lower` is always 0 and only
/// `upper` is compared against |diff|.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Interval {
    #[serde(default)]
    pub lower: f64,
    pub upper: f64,
}

impl Interval {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn is_finite(&self) -> bool {
        self.lower.is_finite() && self.upper.is_finite()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DegenerateReason {
    TooFewSamples { found: usize, required: usize },
    ZeroWidth,
    NonFinite,
}

impl std::fmt::Display for DegenerateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewSamples { found, required } => {
                write!(f, "too few samples ({found} < {required})")
            }
            Self::ZeroWidth => write!(f, "interval has zero width"),
            Self::NonFinite => write!(f, "interval is not finite"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ThresholdDefault {
    Computed { interval: Interval },
    Degenerate { detail: DegenerateReason },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasureThreshold {
    pub measure: String,
    pub method: ThresholdMethod,
    /// Non-NaN deviations the default was computed from.
    pub samples: usize,
    pub default: ThresholdDefault,
    pub operator_override: Option<Interval>,
}

impl MeasureThreshold {
    /// Interval used for flagging: the override if present, else the computed
    /// default. `None` means the measure is excluded from flagging.
    pub fn effective(&self) -> Option<Interval> {
        if let Some(ov) = self.operator_override {
            return Some(ov);
        }
        match &self.default {
            ThresholdDefault::Computed { interval } => Some(*interval),
            ThresholdDefault::Degenerate { .. } => None,
        }
    }

    pub fn degenerate_reason(&self) -> Option<&DegenerateReason> {
        match &self.default {
            ThresholdDefault::Degenerate { detail } => Some(detail),
            ThresholdDefault::Computed { .. } => None,
        }
    }
}

/// Per-measure thresholds for one deviation table. Defaults are computed once;
/// operator overrides touch a single measure and never trigger recomputation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdSet {
    pub mode: ComparisonMode,
    pub measures: Vec<MeasureThreshold>,
}

// ---------------------------------------------------------------------------
// Outliers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedThreshold {
    pub measure: String,
    pub interval: Interval,
    pub overridden: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedMeasure {
    pub measure: String,
    pub reason: DegenerateReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedRow {
    /// Index into `DeviationTable::rows`.
    pub row: usize,
    /// Selected measures whose deviation fell outside their interval.
    pub measures: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutlierReport {
    pub mode: ComparisonMode,
    /// Resolved measure selection, groups expanded.
    pub selection: Vec<String>,
    pub applied: Vec<AppliedThreshold>,
    pub excluded: Vec<ExcludedMeasure>,
    /// Sorted by row index.
    pub flagged: Vec<FlaggedRow>,
}

impl OutlierReport {
    pub fn flag_for(&self, row: usize) -> Option<&FlaggedRow> {
        self.flagged
            .binary_search_by_key(&row, |f| f.row)
            .ok()
            .map(|i| &self.flagged[i])
    }

    pub fn is_flagged(&self, row: usize) -> bool {
        self.flag_for(row).is_some()
    }

    /// The deviation table restricted to flagged rows.
    pub fn flagged_rows<'a>(
        &'a self,
        table: &'a DeviationTable,
    ) -> impl Iterator<Item = &'a DeviationRow> + 'a {
        self.flagged.iter().filter_map(move |f| table.rows.get(f.row))
    }
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QcSummary {
    pub pairs: usize,
    pub flagged: usize,
    pub flagged_by_measure: Vec<(String, usize)>,
    pub excluded_measures: usize,
    pub ambiguous_left: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupCount {
    pub value: String,
    pub rows: usize,
    pub flagged: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QcMeta {
    pub config_name: String,
    pub mode: ComparisonMode,
    pub labels: SideLabels,
    pub engine_version: String,
    pub run_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QcReport {
    pub meta: QcMeta,
    pub diagnostics: MatchDiagnostics,
    pub skipped_measures: Vec<String>,
    pub thresholds: ThresholdSet,
    pub outliers: OutlierReport,
    pub summary: QcSummary,
    #[serde(skip)]
    pub deviations: DeviationTable,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QcOutcome {
    NoMatches { meta: QcMeta, diagnostics: MatchDiagnostics },
    Complete(Box<QcReport>),
}

impl QcOutcome {
    pub fn meta(&self) -> &QcMeta {
        match self {
            Self::NoMatches { meta, .. } => meta,
            Self::Complete(report) => &report.meta,
        }
    }
}

/// Thresholds-only run: matched and differenced, never flagged.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ThresholdOutcome {
    NoMatches { meta: QcMeta, diagnostics: MatchDiagnostics },
    Computed { meta: QcMeta, pairs: usize, thresholds: ThresholdSet },
}

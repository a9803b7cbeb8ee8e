use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::QcError;
use crate::model::Interval;

/// Default begin/end offset tolerance, in offset units (miles).
pub const DEFAULT_TOLERANCE: f64 = 0.05;

/// Rounding slack for offset comparisons. Offsets are decimal miles, so a
/// nominal delta of exactly the tolerance can land a few ulps either side of
/// it after subtraction; anything within this of the tolerance is rejected.
pub const OFFSET_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct QcConfig {
    pub name: String,
    pub mode: ComparisonMode,
    #[serde(default)]
    pub columns: ColumnMapping,
    #[serde(default)]
    pub matching: MatchConfig,
    pub measures: Vec<MeasureSpec>,
    #[serde(default)]
    pub measure_groups: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub thresholds: ThresholdPolicy,
    #[serde(default)]
    pub datasets: Option<DatasetFiles>,
    #[serde(default)]
    pub output: OutputConfig,
}

// ---------------------------------------------------------------------------
// Comparison mode
// ---------------------------------------------------------------------------

/// Which kind of QC comparison is being run.
///
/// `Audit` compares two independent surveys of the same segments and expects
/// near-zero deviation. `YearOverYear` compares two fiscal years and expects
/// a real, possibly one-sided drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    Audit,
    YearOverYear,
}

impl std::fmt::Display for ComparisonMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audit => write!(f, "audit"),
            Self::YearOverYear => write!(f, "year_over_year"),
        }
    }
}

// ---------------------------------------------------------------------------
// Column mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnMapping {
    #[serde(default = "default_route_id")]
    pub route_id: String,
    #[serde(default = "default_county")]
    pub county: String,
    #[serde(default = "default_begin_offset")]
    pub begin_offset: String,
    #[serde(default = "default_end_offset")]
    pub end_offset: String,
    #[serde(default = "default_fiscal_year")]
    pub fiscal_year: String,
}

fn default_route_id() -> String {
    "route_id".into()
}

fn default_county() -> String {
    "county".into()
}

fn default_begin_offset() -> String {
    "begin_offset".into()
}

fn default_end_offset() -> String {
    "end_offset".into()
}

fn default_fiscal_year() -> String {
    "fiscal_year".into()
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            route_id: default_route_id(),
            county: default_county(),
            begin_offset: default_begin_offset(),
            end_offset: default_end_offset(),
            fiscal_year: default_fiscal_year(),
        }
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Segment matching options.
///
/// A candidate survives when `|Δbegin|` and `|Δend|` are both strictly below
/// `tolerance`. The comparison is `|Δ| < tolerance - OFFSET_EPSILON`, so a
/// pair whose offsets differ by exactly the tolerance is always rejected,
/// wherever it sits on the route.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchConfig {
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default)]
    pub policy: MatchPolicy,
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            policy: MatchPolicy::default(),
        }
    }
}

/// What to keep when one A-record has several B-candidates within tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Keep every surviving candidate as its own pair. Row counts can grow.
    #[default]
    AllCandidates,
    /// Keep only the candidate with the smallest total offset distance.
    ClosestOnly,
}

// ---------------------------------------------------------------------------
// Measures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MeasureSpec {
    pub name: String,
    #[serde(default)]
    pub kind: MeasureKind,
}

impl MeasureSpec {
    pub fn raw(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: MeasureKind::Raw }
    }

    pub fn utility(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: MeasureKind::UtilityIndex }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureKind {
    /// Physical measurement; differenced.
    #[default]
    Raw,
    /// Pre-normalized score; carried through but never differenced.
    UtilityIndex,
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMethod {
    #[default]
    Percentile,
    /// Tukey fence: Q1 - k*IQR .. Q3 + k*IQR.
    BoxStyle,
}

impl std::fmt::Display for ThresholdMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Percentile => write!(f, "percentile"),
            Self::BoxStyle => write!(f, "box_style"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThresholdPolicy {
    #[serde(default)]
    pub method: ThresholdMethod,
    /// Per-measure method, overriding `method`.
    #[serde(default)]
    pub per_measure: BTreeMap<String, ThresholdMethod>,
    /// Audit mode: percentile of |diff| used as the upper bound.
    #[serde(default = "default_audit_percentile")]
    pub audit_percentile: f64,
    /// Year-over-year mode: signed percentile band.
    #[serde(default = "default_lower_percentile")]
    pub lower_percentile: f64,
    #[serde(default = "default_upper_percentile")]
    pub upper_percentile: f64,
    #[serde(default = "default_iqr_multiplier")]
    pub iqr_multiplier: f64,
    /// Fewer non-NaN deviations than this and the measure is degenerate.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Operator-supplied intervals applied on top of computed defaults.
    #[serde(default)]
    pub overrides: BTreeMap<String, Interval>,
}

fn default_audit_percentile() -> f64 {
    95.0
}

fn default_lower_percentile() -> f64 {
    2.5
}

fn default_upper_percentile() -> f64 {
    97.5
}

fn default_iqr_multiplier() -> f64 {
    1.5
}

fn default_min_samples() -> usize {
    20
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            method: ThresholdMethod::default(),
            per_measure: BTreeMap::new(),
            audit_percentile: default_audit_percentile(),
            lower_percentile: default_lower_percentile(),
            upper_percentile: default_upper_percentile(),
            iqr_multiplier: default_iqr_multiplier(),
            min_samples: default_min_samples(),
            overrides: BTreeMap::new(),
        }
    }
}

impl ThresholdPolicy {
    pub fn method_for(&self, measure: &str) -> ThresholdMethod {
        self.per_measure.get(measure).copied().unwrap_or(self.method)
    }

    pub fn validate(&self) -> Result<(), QcError> {
        for (label, p) in [
            ("audit_percentile", self.audit_percentile),
            ("lower_percentile", self.lower_percentile),
            ("upper_percentile", self.upper_percentile),
        ] {
            if !(0.0..=100.0).contains(&p) {
                return Err(QcError::ConfigValidation(format!(
                    "{label} must be within 0..=100, got {p}"
                )));
            }
        }
        if self.lower_percentile >= self.upper_percentile {
            return Err(QcError::ConfigValidation(format!(
                "lower_percentile ({}) must be below upper_percentile ({})",
                self.lower_percentile, self.upper_percentile
            )));
        }
        if !self.iqr_multiplier.is_finite() || self.iqr_multiplier < 0.0 {
            return Err(QcError::ConfigValidation(format!(
                "iqr_multiplier must be a non-negative number, got {}",
                self.iqr_multiplier
            )));
        }
        if self.min_samples == 0 {
            return Err(QcError::ConfigValidation("min_samples must be at least 1".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Files + Output (CLI surface)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetFiles {
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub csv: Option<String>,
    #[serde(default)]
    pub json: Option<String>,
    #[serde(default)]
    pub scope: ExportScope,
    /// Measures or measure groups to flag on. Empty = every differenced measure.
    #[serde(default)]
    pub select: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportScope {
    All,
    #[default]
    FlaggedOnly,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl QcConfig {
    pub fn from_toml(input: &str) -> Result<Self, QcError> {
        let config: QcConfig =
            toml::from_str(input).map_err(|e| QcError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), QcError> {
        let tol = self.matching.tolerance;
        if !tol.is_finite() || tol <= 0.0 {
            return Err(QcError::ConfigValidation(format!(
                "matching.tolerance must be a positive number, got {tol}"
            )));
        }

        if self.measures.is_empty() {
            return Err(QcError::ConfigValidation("at least one measure is required".into()));
        }

        let mut names = BTreeSet::new();
        for m in &self.measures {
            if !names.insert(m.name.as_str()) {
                return Err(QcError::ConfigValidation(format!(
                    "measure '{}' is listed twice",
                    m.name
                )));
            }
        }

        for (group, members) in &self.measure_groups {
            if names.contains(group.as_str()) {
                return Err(QcError::ConfigValidation(format!(
                    "measure group '{group}' shadows a measure of the same name"
                )));
            }
            if members.is_empty() {
                return Err(QcError::ConfigValidation(format!(
                    "measure group '{group}' is empty"
                )));
            }
            for member in members {
                if !names.contains(member.as_str()) {
                    return Err(QcError::ConfigValidation(format!(
                        "measure group '{group}': unknown measure '{member}'"
                    )));
                }
            }
            let has_raw = self
                .measures
                .iter()
                .any(|m| m.kind == MeasureKind::Raw && members.contains(&m.name));
            if !has_raw {
                return Err(QcError::ConfigValidation(format!(
                    "measure group '{group}' holds only utility/index measures, which are not differenced"
                )));
            }
        }

        self.thresholds.validate()?;

        for measure in self
            .thresholds
            .per_measure
            .keys()
            .chain(self.thresholds.overrides.keys())
        {
            if !names.contains(measure.as_str()) {
                return Err(QcError::ConfigValidation(format!(
                    "thresholds: unknown measure '{measure}'"
                )));
            }
        }

        for name in &self.output.select {
            if !names.contains(name.as_str()) && !self.measure_groups.contains_key(name) {
                return Err(QcError::ConfigValidation(format!(
                    "output.select: unknown measure or group '{name}'"
                )));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_AUDIT: &str = r#"
name = "FY24 Pathway audit"
mode = "audit"

[columns]
route_id = "ROUTE_ID"
county = "COUNTY"
begin_offset = "BEG_OFFSET"
end_offset = "END_OFFSET"

[[measures]]
name = "IRI_LEFT"

[[measures]]
name = "IRI_RIGHT"

[[measures]]
name = "RIDE_UTIL"
kind = "utility_index"

[measure_groups]
IRI = ["IRI_LEFT", "IRI_RIGHT"]

[thresholds]
method = "percentile"

[thresholds.per_measure]
IRI_RIGHT = "box_style"
"#;

    #[test]
    fn parse_valid_audit() {
        let config = QcConfig::from_toml(VALID_AUDIT).unwrap();
        assert_eq!(config.name, "FY24 Pathway audit");
        assert_eq!(config.mode, ComparisonMode::Audit);
        assert_eq!(config.columns.route_id, "ROUTE_ID");
        assert_eq!(config.columns.fiscal_year, "fiscal_year");
        assert_eq!(config.matching.tolerance, DEFAULT_TOLERANCE);
        assert_eq!(config.matching.policy, MatchPolicy::AllCandidates);
        assert_eq!(config.measures.len(), 3);
        assert_eq!(config.measures[0].kind, MeasureKind::Raw);
        assert_eq!(config.measures[2].kind, MeasureKind::UtilityIndex);
        assert_eq!(config.thresholds.method_for("IRI_LEFT"), ThresholdMethod::Percentile);
        assert_eq!(config.thresholds.method_for("IRI_RIGHT"), ThresholdMethod::BoxStyle);
        assert_eq!(config.thresholds.audit_percentile, 95.0);
        assert_eq!(config.thresholds.min_samples, 20);
        assert_eq!(config.output.scope, ExportScope::FlaggedOnly);
        assert!(config.datasets.is_none());
    }

    #[test]
    fn parse_year_over_year_with_overrides() {
        let input = r#"
name = "FY23 vs FY24"
mode = "year_over_year"

[matching]
tolerance = 0.02
policy = "closest_only"

[[measures]]
name = "RUT_AVG"

[thresholds]
method = "box_style"
iqr_multiplier = 3.0

[thresholds.overrides.RUT_AVG]
lower = -0.1
upper = 0.2

[datasets]
left = "fy23.csv"
right = "fy24.csv"

[output]
csv = "out.csv"
scope = "all"
"#;
        let config = QcConfig::from_toml(input).unwrap();
        assert_eq!(config.mode, ComparisonMode::YearOverYear);
        assert_eq!(config.matching.tolerance, 0.02);
        assert_eq!(config.matching.policy, MatchPolicy::ClosestOnly);
        assert_eq!(config.thresholds.iqr_multiplier, 3.0);
        let ov = config.thresholds.overrides["RUT_AVG"];
        assert_eq!(ov.lower, -0.1);
        assert_eq!(ov.upper, 0.2);
        let files = config.datasets.unwrap();
        assert_eq!(files.left, "fy23.csv");
        assert_eq!(config.output.scope, ExportScope::All);
    }

    #[test]
    fn reject_unknown_mode() {
        let input = r#"
name = "Bad"
mode = "yearly"
[[measures]]
name = "IRI"
"#;
        let err = QcConfig::from_toml(input).unwrap_err();
        assert!(matches!(err, QcError::ConfigParse(_)));
    }

    #[test]
    fn reject_non_positive_tolerance() {
        let input = r#"
name = "Bad"
mode = "audit"
[matching]
tolerance = 0.0
[[measures]]
name = "IRI"
"#;
        let err = QcConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("tolerance"));
    }

    #[test]
    fn reject_duplicate_measure() {
        let input = r#"
name = "Bad"
mode = "audit"
[[measures]]
name = "IRI"
[[measures]]
name = "IRI"
"#;
        let err = QcConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn reject_group_with_unknown_member() {
        let input = r#"
name = "Bad"
mode = "audit"
[[measures]]
name = "IRI_LEFT"
[measure_groups]
IRI = ["IRI_LEFT", "IRI_AVG"]
"#;
        let err = QcConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("'IRI_AVG'"));
    }

    #[test]
    fn reject_utility_only_group() {
        let input = r#"
name = "Bad"
mode = "audit"
[[measures]]
name = "IRI"
[[measures]]
name = "RIDE_UTIL"
kind = "utility_index"
[measure_groups]
RIDE = ["RIDE_UTIL"]
"#;
        let err = QcConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("'RIDE'"), "{err}");
    }

    #[test]
    fn reject_inverted_percentile_band() {
        let input = r#"
name = "Bad"
mode = "year_over_year"
[[measures]]
name = "IRI"
[thresholds]
lower_percentile = 90.0
upper_percentile = 10.0
"#;
        let err = QcConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("lower_percentile"));
    }

    #[test]
    fn reject_unknown_select() {
        let input = r#"
name = "Bad"
mode = "audit"
[[measures]]
name = "IRI"
[output]
select = ["RUT"]
"#;
        let err = QcConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("'RUT'"));
    }
}
